//! `tether frame` — re-frame newline-delimited JSON from stdin onto stdout.
//!
//! Inbound lines are decoded by a [`MessageChannel`] reading stdin, pushed
//! through a [`Relay`], and re-encoded one message per line on stdout by the
//! same channel. With `--hold` the relay stays paused until stdin ends, so
//! nothing is emitted before the whole input has been read.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;
use tether_core::config;
use tether_streams::{ChannelError, ChannelEvent, MessageChannel, Relay, RelayEvent};
use tokio::sync::mpsc;

/// Arguments for `tether frame`.
#[derive(Args, Debug)]
pub struct FrameArgs {
    /// Buffer every message until stdin is exhausted, then emit them in order.
    #[arg(long)]
    pub hold: bool,
}

/// What one run of the framer saw on stdin.
#[derive(Debug, Default)]
struct FrameSummary {
    messages: usize,
    malformed: usize,
    unterminated: usize,
}

impl FrameArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let config = config::load_at(home).context("failed to load config")?;
        let hold = self.hold || config.relay.start_paused;

        let summary = super::runtime()?.block_on(async move {
            let channel = Arc::new(MessageChannel::with_config(
                tokio::io::stdout(),
                tokio::io::stdin(),
                &config.channel,
            ));
            frame(channel, hold).await
        })?;

        tracing::debug!(
            messages = summary.messages,
            malformed = summary.malformed,
            "framing finished"
        );
        if summary.unterminated > 0 {
            eprintln!(
                "tether: discarded {} bytes of unterminated input",
                summary.unterminated
            );
        }
        if summary.malformed > 0 {
            bail!("{} malformed line(s) on stdin", summary.malformed);
        }
        Ok(())
    }
}

async fn frame(
    channel: Arc<MessageChannel<tokio::io::Stdout>>,
    hold: bool,
) -> Result<FrameSummary> {
    let relay: Relay<Value> = Relay::new(hold);

    // Relay listeners are synchronous; a task owns the async stdout writes.
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    relay.subscribe(move |event| match event {
        RelayEvent::Data(message) => {
            let _ = tx.send(message.clone());
        }
        RelayEvent::Error(err) => tracing::warn!(error = %err, "relay rejected a message"),
    });
    let writer = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                channel.send(&message).await?;
            }
            Ok::<_, ChannelError>(())
        })
    };

    let mut summary = FrameSummary::default();
    while let Some(event) = channel.recv().await {
        match event {
            ChannelEvent::Message(message) => {
                relay.write(message)?;
                summary.messages += 1;
            }
            ChannelEvent::Error(err @ ChannelError::Parse { .. }) => {
                eprintln!("tether: {err}");
                summary.malformed += 1;
            }
            ChannelEvent::Error(err) => return Err(err).context("failed to read stdin"),
        }
    }
    summary.unterminated = channel.pending().len();

    relay.resume();
    relay.terminate();
    // Dropping the last handle drops the listener and closes the writer's queue.
    drop(relay);

    writer
        .await
        .context("stdout writer task failed")?
        .context("failed to write stdout")?;
    Ok(summary)
}
