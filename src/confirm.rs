//! Confirmation gate consulted before destructive operations.

use std::io::{BufRead, Write};

/// What the operator is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationContext {
    /// Operation name (`rollback`, `sync`, ...).
    pub operation: String,
    /// One-line description of the effect.
    pub summary: String,
    /// Tables that will be modified.
    pub tables: Vec<String>,
}

/// Decides whether a destructive operation may proceed.
pub trait ConfirmationPort: Send + Sync {
    /// Returns `true` to proceed.
    fn confirm(&self, context: &ConfirmationContext) -> bool;
}

impl<F> ConfirmationPort for F
where
    F: Fn(&ConfirmationContext) -> bool + Send + Sync,
{
    fn confirm(&self, context: &ConfirmationContext) -> bool {
        self(context)
    }
}

/// Answers every request the same way (`--yes`, drills, tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoConfirm(pub bool);

impl ConfirmationPort for AutoConfirm {
    fn confirm(&self, _context: &ConfirmationContext) -> bool {
        self.0
    }
}

/// Asks on the terminal; anything but `y`/`yes` declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptConfirm;

impl ConfirmationPort for PromptConfirm {
    fn confirm(&self, context: &ConfirmationContext) -> bool {
        let mut stdout = std::io::stdout().lock();
        let prompt = format!(
            "{}: {}\n  tables: {}\nProceed? [y/N] ",
            context.operation,
            context.summary,
            context.tables.join(", ")
        );
        if stdout.write_all(prompt.as_bytes()).and_then(|()| stdout.flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ConfirmationContext {
        ConfirmationContext {
            operation: "rollback".into(),
            summary: "restore 2 tables".into(),
            tables: vec!["alanlar".into(), "ogrenciler".into()],
        }
    }

    #[test]
    fn auto_confirm_answers_fixed() {
        assert!(AutoConfirm(true).confirm(&context()));
        assert!(!AutoConfirm(false).confirm(&context()));
    }

    #[test]
    fn closures_are_ports() {
        let only_small = |ctx: &ConfirmationContext| ctx.tables.len() < 2;
        assert!(!only_small.confirm(&context()));
    }
}
