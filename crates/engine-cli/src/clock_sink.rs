//! Simulated output: advances a wall clock instead of rendering audio.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use media_engine::{DeviceSink, SinkNotifier};
use media_engine_types::StreamHandle;
use tokio::task::JoinHandle;

pub struct ClockSink {
    default_track_ms: u64,
    /// Length of the loaded track: the descriptor's hint, or the default.
    track_ms: u64,
    tick: Duration,
    rate: f32,
    notifier: Option<SinkNotifier>,
    position_ms: Arc<AtomicU64>,
    ticker: Option<JoinHandle<()>>,
}

impl ClockSink {
    pub fn new(default_track_ms: u64, tick_ms: u64) -> Self {
        Self {
            default_track_ms,
            track_ms: default_track_ms,
            tick: Duration::from_millis(tick_ms.max(1)),
            rate: 1.0,
            notifier: None,
            position_ms: Arc::new(AtomicU64::new(0)),
            ticker: None,
        }
    }

    fn halt(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    /// Media time covered by one wall-clock tick at the current rate.
    fn step_ms(&self) -> u64 {
        ((self.tick.as_millis() as f64) * f64::from(self.rate)).round().max(1.0) as u64
    }
}

impl Drop for ClockSink {
    fn drop(&mut self) {
        self.halt();
    }
}

impl DeviceSink for ClockSink {
    fn load(&mut self, stream: &StreamHandle, notifier: SinkNotifier) -> Result<()> {
        self.halt();
        tracing::debug!(source = ?stream.source, codec = ?stream.codec, "clock sink load");
        self.position_ms.store(0, Ordering::SeqCst);
        self.track_ms = match notifier.duration_hint() {
            Some(duration_ms) => duration_ms,
            None => {
                notifier.on_duration(self.default_track_ms);
                self.default_track_ms
            }
        };
        self.notifier = Some(notifier);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let notifier = self
            .notifier
            .clone()
            .ok_or_else(|| anyhow!("play without a loaded stream"))?;
        if self.ticker.is_some() {
            return Ok(());
        }
        let position = self.position_ms.clone();
        let tick = self.tick;
        let step = self.step_ms();
        let track_ms = self.track_ms;
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            loop {
                interval.tick().await;
                let now = (position.fetch_add(step, Ordering::SeqCst) + step).min(track_ms);
                notifier.on_position_update(now);
                if now >= track_ms {
                    notifier.on_ended();
                    break;
                }
                if notifier.is_closed() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.halt();
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.position_ms
            .store(position_ms.min(self.track_ms), Ordering::SeqCst);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        tracing::debug!(volume, "clock sink volume");
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> Result<()> {
        tracing::debug!(rate, "clock sink rate");
        self.rate = rate;
        if self.ticker.is_some() {
            self.halt();
            self.play()?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.halt();
        self.notifier = None;
        self.position_ms.store(0, Ordering::SeqCst);
        Ok(())
    }
}
