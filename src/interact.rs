//! CLI `Interact`: blocking stdin y/n prompt for confirmation/stuck/
//! batch-boundary callbacks (§4.7 step 1, §4.8 steps 7-8). Interactive
//! shell/TUI chrome is explicitly out of scope (§1) — this is the
//! plainest possible terminal prompt, not a UI.

use async_trait::async_trait;
use forge_common::Interact;
use std::io::Write;

pub struct CliInteract {
    pub auto_yes: bool,
}

#[async_trait]
impl Interact for CliInteract {
    async fn confirm(&self, prompt: &str) -> bool {
        if self.auto_yes {
            println!("{prompt} [auto-yes]");
            return true;
        }
        print!("{prompt} [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}
