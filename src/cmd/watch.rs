//! Live view command: `shopfloor watch`.
//!
//! Attaches every collection to the live-update link and prints a status
//! line whenever a collection changes or the link changes state. Runs until
//! Ctrl-C.

use anyhow::Result;
use console::style;

use shopfloor::client::{LinkState, LiveUpdates, NoticeLevel, ShopClient};
use shopfloor::config::ShopfloorConfig;

pub async fn cmd_watch(config: &ShopfloorConfig) -> Result<()> {
    let client = ShopClient::from_config(&config.toml)?;
    let live = LiveUpdates::connect(client.api.base_url(), &config.toml.live)?;
    let _subscriptions = client.attach_all(&live);

    println!(
        "{} {}",
        style("Watching").cyan().bold(),
        client.api.base_url()
    );
    for (resource, error) in client.refresh_all().await {
        println!(
            "{} {} list failed to load: {}",
            style("warning:").yellow(),
            resource,
            error
        );
    }
    print_counts(&client);

    let mut link = live.watch_state();
    let mut notices = client.notices.subscribe();
    let mut orders = client.pipeline.subscribe();
    let mut items = client.restok.subscribe();
    let mut roadmaps = client.roadmaps.subscribe();
    let mut job_works = client.job_works.subscribe();
    let mut machine_types = client.machine_types.subscribe();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *link.borrow_and_update();
                print_link(state);
                if state == LinkState::Closed {
                    break;
                }
            }
            notice = notices.recv() => {
                if let Ok(notice) = notice {
                    match notice.level {
                        NoticeLevel::Error => println!("{}", style(&notice).red()),
                        NoticeLevel::Info => println!("{}", notice),
                    }
                }
            }
            Ok(()) = orders.changed() => print_counts(&client),
            Ok(()) = items.changed() => print_counts(&client),
            Ok(()) = roadmaps.changed() => print_counts(&client),
            Ok(()) = job_works.changed() => print_counts(&client),
            Ok(()) = machine_types.changed() => print_counts(&client),
        }
    }

    live.shutdown().await;
    println!("Stopped.");
    Ok(())
}

fn print_link(state: LinkState) {
    let text = format!("link: {}", state);
    let styled = match state {
        LinkState::Connected => style(text).green(),
        LinkState::Polling | LinkState::Reconnecting => style(text).yellow(),
        LinkState::Connecting => style(text).dim(),
        LinkState::Closed => style(text).red(),
    };
    println!("{}", styled);
}

fn print_counts(client: &ShopClient) {
    let active = client.pipeline.active_orders().len();
    let low = client.restok.low_stock().len();
    println!(
        "orders {} ({} active)  items {} ({} low)  roadmaps {}  job works {}  machine types {}",
        client.pipeline.snapshot().len(),
        active,
        client.restok.snapshot().len(),
        low,
        client.roadmaps.snapshot().len(),
        client.job_works.snapshot().len(),
        client.machine_types.snapshot().len(),
    );
}
