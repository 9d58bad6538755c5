//! Merge the guest cart into an account.

use std::io::Write;

use cart_sync::MergeReport;

use super::{CliError, Session, print_cart};

/// Sign in, wait for the merge, then print the merged cart and the report.
pub async fn run(session: &Session) -> Result<(), CliError> {
    if !session.authenticated {
        return Err(CliError::MissingCredential);
    }

    // Queued behind the merge, so it answers with the merged cart.
    let cart = session.cart.get_cart().await?;
    let report = session.cart.merge_reports().borrow().clone();

    match &report {
        Some(report) => {
            tracing::info!(
                user_id = %report.user_id,
                replayed = report.replayed.len(),
                dropped = report.dropped.len(),
                "Merge finished"
            );
            print_report(report)?;
        }
        None => tracing::warn!("No merge report was produced"),
    }
    print_cart(&cart)
}

fn print_report(report: &MergeReport) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if report.is_noop() {
        writeln!(out, "Guest cart was empty, nothing merged")?;
        return Ok(());
    }
    writeln!(
        out,
        "Merged {} guest line(s) into {}",
        report.replayed.len(),
        report.user_id
    )?;
    for line in &report.dropped {
        writeln!(
            out,
            "  dropped: {} x{}",
            line.product_id, line.quantity
        )?;
    }
    Ok(())
}
