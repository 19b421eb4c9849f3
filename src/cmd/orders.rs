//! Work-order commands: `shopfloor orders`.
//!
//! Each command loads the pipeline, applies one change optimistically, and
//! waits for the sync queue to drain. A rolled-back change is reported as
//! an error.

use anyhow::{Result, bail};
use console::style;

use super::super::OrdersCommands;
use shopfloor::client::{NoticeLevel, ShopClient};
use shopfloor::config::ShopfloorConfig;
use shopfloor::domain::{PathStep, StepStatus, WorkOrder};

/// Parse `machine:<label>:<machine-type-id>` or `jobwork:<label>:<job-work-id>`.
pub fn parse_step(value: &str) -> Result<PathStep, String> {
    let mut parts = value.splitn(3, ':');
    let (Some(kind), Some(label), Some(target)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!(
            "expected <machine|jobwork>:<label>:<id>, got '{}'",
            value
        ));
    };
    if label.trim().is_empty() || target.trim().is_empty() {
        return Err(format!("step '{}' needs a label and an id", value));
    }
    match kind {
        "machine" => Ok(PathStep::machine(label.trim(), target.trim())),
        "jobwork" | "job-work" => Ok(PathStep::job_work(label.trim(), target.trim())),
        other => Err(format!("unknown step kind '{}'", other)),
    }
}

pub async fn cmd_orders(config: &ShopfloorConfig, command: OrdersCommands) -> Result<()> {
    let client = ShopClient::from_config(&config.toml)?;
    client.pipeline.try_refresh().await?;
    let pipeline = &client.pipeline;

    let touched: Vec<WorkOrder> = match command {
        OrdersCommands::List => {
            print_orders(&pipeline.snapshot());
            return Ok(());
        }
        OrdersCommands::Create {
            name,
            quantity,
            product,
            steps,
        } => vec![pipeline.create_order(&name, &product, quantity, steps)?],
        OrdersCommands::Advance { id } => vec![pipeline.advance(&id)?],
        OrdersCommands::Retreat { id } => vec![pipeline.retreat(&id)?],
        OrdersCommands::Hold { id } => vec![pipeline.hold(&id)?],
        OrdersCommands::Resume { id } => vec![pipeline.resume(&id)?],
        OrdersCommands::Progress { id, done } => vec![pipeline.record_progress(&id, done)?],
        OrdersCommands::Split { id, batches } => pipeline.split(&id, &batches)?,
        OrdersCommands::Delete { id } => {
            let removed = pipeline.delete_order(&id)?;
            client.queue.wait_idle().await;
            check_notices(&client)?;
            println!("{} {}", style("Deleted").red(), removed.name);
            return Ok(());
        }
    };

    client.queue.wait_idle().await;
    check_notices(&client)?;
    print_orders(&touched);
    Ok(())
}

fn check_notices(client: &ShopClient) -> Result<()> {
    let errors: Vec<String> = client
        .notices
        .recent()
        .into_iter()
        .filter(|n| n.level == NoticeLevel::Error)
        .map(|n| n.message)
        .collect();
    if !errors.is_empty() {
        bail!("{}", errors.join("\n"));
    }
    Ok(())
}

fn print_orders(orders: &[WorkOrder]) {
    if orders.is_empty() {
        println!("No work orders.");
        return;
    }
    for order in orders {
        let position = if order.is_finished() {
            style("finished".to_string()).green()
        } else {
            match order.current_step() {
                Some(step) => {
                    let text = format!("{} ({})", step.label, step.status);
                    match step.status {
                        StepStatus::Hold => style(text).yellow(),
                        _ => style(text).cyan(),
                    }
                }
                None => style("not started".to_string()).dim(),
            }
        };
        println!(
            "{}  {}  {}/{}  {}",
            style(&order.id).dim(),
            style(&order.name).bold(),
            order.quantity_done,
            order.quantity,
            position
        );
    }
}
