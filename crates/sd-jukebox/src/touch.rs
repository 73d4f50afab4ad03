//! Keyboard stand-in for the touch pad: every Enter press on stdin reads as one touch.

use std::io::BufRead;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError, TrySendError, bounded};
use uac_player::skip::TouchSensor;

/// Reading reported for one poll after a key press.
const PRESSED: u32 = u32::MAX;

pub struct KeyboardSensor {
    presses: Receiver<()>,
    held: bool,
}

impl KeyboardSensor {
    /// Start the stdin reader thread.
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = bounded(8);
        std::thread::Builder::new()
            .name("stdin-touch".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    if line.is_err() {
                        break;
                    }
                    match tx.try_send(()) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
                tracing::debug!("stdin closed; keyboard skip disabled");
            })
            .context("spawn keyboard reader")?;
        Ok(Self::from_presses(rx))
    }

    fn from_presses(presses: Receiver<()>) -> Self {
        Self {
            presses,
            held: false,
        }
    }
}

impl TouchSensor for KeyboardSensor {
    fn read(&mut self) -> uac_player::Result<u32> {
        // One high poll per press, then low.
        if self.held {
            self.held = false;
            return Ok(0);
        }
        match self.presses.try_recv() {
            Ok(()) => {
                self.held = true;
                Ok(PRESSED)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(0),
        }
    }
}
