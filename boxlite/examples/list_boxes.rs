//! List Boxes Example - display all boxes and their status
//!
//! Starts two short-lived demo boxes so there is something to show, prints
//! the table, then tears everything down.
//! Run with: cargo run --example list_boxes

use std::time::Duration;

use boxlite::{BoxInfo, BoxOptions, BoxliteResult, BoxliteRuntime};

fn print_boxes(boxes: &[BoxInfo]) {
    if boxes.is_empty() {
        println!("No boxes found.");
        return;
    }

    println!(
        "{:<30} {:<10} {:<20} {:<5} {:<8} {:<8}",
        "ID", "STATE", "IMAGE", "CPU", "MEM", "PID"
    );
    println!("{}", "-".repeat(85));

    for info in boxes {
        let mem = format!("{}MB", info.memory_mib);
        println!(
            "{:<30} {:<10} {:<20} {:<5} {:<8} {:<8}",
            info.id.as_str(),
            info.status.as_str(),
            info.image,
            info.cpus,
            mem,
            info.pid_label()
        );
    }

    println!("{}", "-".repeat(85));
    println!("Total: {} box(es)", boxes.len());
}

#[tokio::main]
async fn main() -> BoxliteResult<()> {
    let runtime = BoxliteRuntime::with_defaults()?;

    let sleeper = runtime.create(
        BoxOptions::new("sleep")
            .with_name("sleeper")
            .with_args(["30"])
            .with_memory_mib(256),
    )?;
    runtime.start(&sleeper.id).await?;
    runtime.create(BoxOptions::new("sh").with_args(["-c", "echo hello"]))?;

    print_boxes(&runtime.list_info().await?);

    runtime.shutdown(Some(Duration::from_secs(5))).await
}
