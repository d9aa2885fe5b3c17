//! Replays a page fixture against a live bridge.
//!
//! The bridge is single-threaded, so everything runs on one task. Each loop
//! iteration sleeps until the next timer, scripted page action or inbound
//! message, syncs the bridge clock to elapsed runtime and lets the bridge
//! catch up. Outbound messages are written as JSON lines.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use waymark_core::host::sim::TimedAction;
use waymark_core::{
    Bridge, BridgeSettings, Clock, InboundMessage, ManualClock, Outbox, SimPage, SiteConfigTable,
};

/// Everything a run needs besides its I/O.
pub struct Scenario {
    pub page: SimPage,
    pub timeline: Vec<TimedAction>,
    pub settings: BridgeSettings,
    pub sites: SiteConfigTable,
    pub duration: Duration,
}

/// One managed instance as it stood when the run ended.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub engine: String,
    pub domain: String,
    pub markers: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub messages: usize,
    pub actions: usize,
    pub inbound: usize,
    pub instances: Vec<InstanceSummary>,
}

enum Wake {
    Timer,
    Line(std::io::Result<Option<String>>),
    Shutdown,
}

/// Drive the scenario until its duration elapses, Ctrl-C arrives or the
/// output closes.
pub async fn run<R, W>(scenario: Scenario, input: Option<R>, mut output: W) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Scenario {
        page,
        timeline,
        settings,
        sites,
        duration,
    } = scenario;

    let clock = ManualClock::new(0);
    let outbox = Outbox::new();
    let mut bridge = Bridge::new(
        Rc::new(page),
        Rc::new(clock.clone()),
        settings,
        Arc::new(sites),
        Rc::new(outbox.clone()),
    );

    let end_ms = duration.as_millis() as u64;
    let start = Instant::now();
    let mut pending = timeline.into_iter().peekable();
    let mut lines = input.map(|reader| reader.lines());
    let mut summary = RunSummary::default();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    bridge.initialize();
    loop {
        summary.messages += write_messages(&outbox, &mut output).await?;

        let now = clock.now_ms();
        if now >= end_ms {
            break;
        }
        let next = [
            bridge.next_deadline(),
            pending.peek().map(|step| step.at_ms),
            Some(end_ms),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(end_ms)
        .max(now);

        let wake = tokio::select! {
            _ = tokio::time::sleep_until(start + Duration::from_millis(next)) => Wake::Timer,
            line = next_line(&mut lines) => Wake::Line(line),
            _ = &mut shutdown => Wake::Shutdown,
        };

        clock.set(start.elapsed().as_millis() as u64);
        match wake {
            Wake::Timer => {}
            Wake::Line(Ok(Some(line))) => {
                if handle_line(&mut bridge, &line) {
                    summary.inbound += 1;
                }
            }
            Wake::Line(Ok(None)) => {
                debug!("Input closed");
                lines = None;
            }
            Wake::Line(Err(e)) => {
                warn!("Input failed, ignoring further input: {}", e);
                lines = None;
            }
            Wake::Shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }

        let now = clock.now_ms();
        while let Some(step) = pending.next_if(|step| step.at_ms <= now) {
            debug!("t={}ms {:?}", step.at_ms, step.action);
            match step.action.apply(bridge.host()) {
                Ok(()) => summary.actions += 1,
                Err(e) => warn!("Action at {}ms failed: {}", step.at_ms, e),
            }
        }
        bridge.pump_events();
        bridge.advance();
    }
    summary.messages += write_messages(&outbox, &mut output).await?;

    summary.instances = bridge
        .registry()
        .active_entries()
        .map(|entry| InstanceSummary {
            id: entry.id().to_string(),
            engine: entry.instance().engine.to_string(),
            domain: entry.domain().to_string(),
            markers: entry.overlay().active_count(),
        })
        .collect();
    Ok(summary)
}

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Feed one inbound JSON line to the bridge. Returns `false` if it was
/// skipped.
fn handle_line(bridge: &mut Bridge<SimPage>, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    match serde_json::from_str::<InboundMessage>(line) {
        Ok(message) => {
            bridge.handle_message(message);
            true
        }
        Err(e) => {
            warn!("Ignoring malformed message: {}", e);
            false
        }
    }
}

async fn write_messages<W>(outbox: &Outbox, output: &mut W) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let messages = outbox.drain();
    if messages.is_empty() {
        return Ok(0);
    }
    for message in &messages {
        let mut line = serde_json::to_string(message).context("Failed to encode message")?;
        line.push('\n');
        output
            .write_all(line.as_bytes())
            .await
            .context("Failed to write message")?;
    }
    output.flush().await.context("Failed to flush output")?;
    Ok(messages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_core::PageFixture;

    const FIXTURE: &str = r#"{
        "url": "https://shop.example/locations",
        "engines": ["EngineB"],
        "nodes": [{"id": "map", "size": [300, 200]}],
        "actions": [
            {"at_ms": 700, "action": "create_map", "container": "map", "engine": "EngineB",
             "bounds": {"north": 1, "south": 0, "east": 1, "west": 0}},
            {"at_ms": 1800, "action": "pan_to", "container": "map", "lat": 0.6, "lng": 0.6}
        ]
    }"#;

    fn scenario(duration_ms: u64) -> Scenario {
        let fixture = PageFixture::from_json_str(FIXTURE).unwrap();
        Scenario {
            page: fixture.build().unwrap(),
            timeline: fixture.timeline(),
            settings: BridgeSettings::default(),
            sites: SiteConfigTable::default(),
            duration: Duration::from_millis(duration_ms),
        }
    }

    fn parse(output: &[u8]) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_fixture() {
        let mut output = Vec::new();
        let summary = run(scenario(3_000), None::<&[u8]>, &mut output)
            .await
            .unwrap();

        let messages = parse(&output);
        assert_eq!(messages[0]["type"], "BRIDGE_READY");
        assert!(messages
            .iter()
            .any(|m| m["type"] == "BOUNDS_UPDATE" && m["payload"]["source"] == "map_event"));
        assert_eq!(summary.actions, 2);
        assert_eq!(summary.messages, messages.len());
        assert_eq!(summary.instances.len(), 1);
        assert_eq!(summary.instances[0].domain, "shop.example");
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_pois_reach_the_overlay() {
        let input = concat!(
            "not json\n",
            r##"{"type": "DATA_UPDATE", "payload": {"pois": [{"id": "p1", "name": "One", "latitude": 0.5, "longitude": 0.5, "color": "#000", "secondaryColor": "#fff"}]}}"##,
            "\n"
        );
        let mut output = Vec::new();
        let summary = run(scenario(2_000), Some(input.as_bytes()), &mut output)
            .await
            .unwrap();

        assert_eq!(summary.inbound, 1);
        assert_eq!(summary.instances[0].markers, 1);
    }
}
