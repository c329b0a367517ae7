//! Terminal front end for authorization prompts.

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, Result};
use custody_core::{TransactionPlan, UiRequest, UserChoice};
use tokio::sync::mpsc;
use tracing::warn;

/// Answers `UiRequest`s on stdin/stdout until the authorizer drops its sender.
pub async fn serve(mut requests: mpsc::Receiver<UiRequest>) {
    while let Some(request) = requests.recv().await {
        let answered = tokio::task::spawn_blocking(move || answer(request)).await;
        match answered {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "prompt failed"),
            Err(err) => warn!(error = %err, "prompt task failed"),
        }
    }
}

fn answer(request: UiRequest) -> Result<()> {
    match request {
        UiRequest::Approve { plan, reply } => {
            print_plan(&plan);
            let choice = if confirm("Approve this transaction? [y/N] ")? {
                UserChoice::Approved
            } else {
                UserChoice::Denied
            };
            let _ = reply.send(choice);
        }
        UiRequest::DisplayAndScan { qr, summary, reply } => {
            println!("Scan with the signing device: {summary}");
            println!("{}", hex::encode(&qr));
            let scanned = read_line("Paste the signature code (empty to cancel): ")?;
            let response = match scanned.trim() {
                "" => None,
                code => Some(hex::decode(code).map_err(|e| anyhow!("signature code: {e}"))?),
            };
            let _ = reply.send(response);
        }
        UiRequest::RequestPassword { attempt, reply } => {
            let prompt = format!("Password (attempt {attempt}): ");
            let password = rpassword::prompt_password(prompt).ok();
            let _ = reply.send(password);
        }
    }
    Ok(())
}

fn print_plan(plan: &TransactionPlan) {
    println!("Network: {}", plan.network());
    println!("Account: {}", plan.account_index());
    if !plan.summary().is_empty() {
        println!("Summary: {}", plan.summary());
    }
}

pub fn confirm(prompt: &str) -> Result<bool> {
    let line = read_line(prompt)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

pub fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}
