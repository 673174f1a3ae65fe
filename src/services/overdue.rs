//! Overdue loan sweeper
//!
//! Each run notifies the borrowers of active loans past their due date that
//! have not been notified yet. A loan is flagged only after its notification
//! went out, so a failed send is retried on the next run.

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::AppResult,
    models::loan::OverdueLoan,
    repository::LibraryStore,
    services::email::{escape_html, Notifier},
};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub notified: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct OverdueSweeper {
    store: Arc<dyn LibraryStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl OverdueSweeper {
    pub fn new(store: Arc<dyn LibraryStore>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Notify every overdue, not yet notified loan
    ///
    /// Only a failure to query the store is returned; per-loan failures are
    /// logged and counted in the report.
    pub async fn check_overdue_loans(&self) -> AppResult<SweepReport> {
        let now = self.clock.now();
        let overdue = self.store.find_overdue_loans(now).await?;

        let mut report = SweepReport {
            found: overdue.len(),
            ..Default::default()
        };

        for loan in &overdue {
            match self.notify(loan).await {
                Ok(()) => report.notified += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(loan_id = %loan.loan_id, user_id = %loan.user_id, "Overdue notification failed: {}", e);
                }
            }
        }

        tracing::info!(
            found = report.found,
            notified = report.notified,
            failed = report.failed,
            "Overdue sweep finished"
        );

        Ok(report)
    }

    async fn notify(&self, loan: &OverdueLoan) -> AppResult<()> {
        let (subject, body) = reminder(loan);
        self.notifier.send(&loan.user_email, &subject, &body).await?;

        if self.store.mark_overdue_notified(loan.loan_id).await? {
            tracing::info!(loan_id = %loan.loan_id, to = %loan.user_email, "Overdue notification sent");
        } else {
            tracing::warn!(loan_id = %loan.loan_id, "Loan was already flagged as notified");
        }
        Ok(())
    }
}

fn reminder(loan: &OverdueLoan) -> (String, String) {
    let subject = format!("Overdue: {}", loan.book_title);
    let body = format!(
        r#"<h1>Book Return Reminder</h1>
<p>Hello {name},</p>
<p>The book <b>{title}</b> was due on {due}. Please return it as soon as possible.</p>"#,
        name = escape_html(&loan.user_name),
        title = escape_html(&loan.book_title),
        due = loan.due_date.format("%Y-%m-%d"),
    );
    (subject, body)
}
