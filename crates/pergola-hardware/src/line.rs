//! [`HardwareBridge`] over any byte stream speaking the text-line protocol.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::protocol::{self, BoardLine};
use crate::{HardwareBridge, HardwareError, RuntimeMode, SensorFrame, ServoPositions};

/// How long a read waits for another line before returning what it has.
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// Upper bound on lines consumed by a single read, so a chatty board
/// cannot hold the runner forever.
const MAX_LINES_PER_READ: usize = 64;

/// Longest line the board can legitimately send. Anything longer is noise,
/// usually a baud rate mismatch.
const MAX_LINE_LEN: usize = 256;

/// Bridge speaking the line protocol over a byte stream.
///
/// Partial lines survive across reads: bytes are accumulated until the
/// terminating newline arrives. A partial line that outgrows
/// `MAX_LINE_LEN` is dropped along with the rest of it up to the next newline.
#[derive(Debug)]
pub struct LineBridge<S> {
    stream: BufReader<S>,
    pending: Vec<u8>,
    discarding: bool,
}

impl<S> LineBridge<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an open stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            pending: Vec::new(),
            discarding: false,
        }
    }

    /// Drains every complete line currently available and folds it into a frame.
    ///
    /// Returns once no line arrives within the drain window.
    pub async fn read_frame(&mut self) -> Result<SensorFrame, HardwareError> {
        let mut frame = SensorFrame::default();

        for _ in 0..MAX_LINES_PER_READ {
            let read = timeout(
                DRAIN_WINDOW,
                self.stream.read_until(b'\n', &mut self.pending),
            )
            .await;

            let (complete, timed_out) = match read {
                Err(_) => (false, true),
                Ok(Ok(0)) => return Err(HardwareError::Disconnected),
                // EOF mid-line leaves no newline; the next read reports the disconnect
                Ok(Ok(_)) => (self.pending.last() == Some(&b'\n'), false),
                Ok(Err(e)) => return Err(e.into()),
            };

            if complete {
                if self.discarding {
                    self.discarding = false;
                } else {
                    let line = String::from_utf8_lossy(&self.pending).into_owned();
                    absorb(&line, &mut frame);
                }
                self.pending.clear();
            } else if self.pending.len() > MAX_LINE_LEN {
                if !self.discarding {
                    warn!(
                        len = self.pending.len(),
                        "Board line too long, discarding up to the next newline"
                    );
                }
                self.discarding = true;
                self.pending.clear();
            }

            if timed_out {
                break;
            }
        }

        Ok(frame)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), HardwareError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        debug!(line = line.trim_end(), "Sent to board");
        Ok(())
    }
}

fn absorb(line: &str, frame: &mut SensorFrame) {
    match protocol::parse_line(line) {
        Ok(BoardLine::Ldr(readings)) => frame.ldr = Some(readings),
        Ok(BoardLine::ServoFeedback(positions)) => frame.servo_feedback = Some(positions),
        Ok(BoardLine::Other) => {
            let line = line.trim();
            if !line.is_empty() {
                debug!(line, "Board says");
            }
        }
        Err(e) => warn!(error = %e, "Ignoring malformed board line"),
    }
}

impl<S> HardwareBridge for LineBridge<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_sensors(&mut self) -> Result<SensorFrame, HardwareError> {
        self.read_frame().await
    }

    async fn write_actuators(&mut self, positions: ServoPositions) -> Result<(), HardwareError> {
        self.write_line(&protocol::encode_actuators(&positions)).await
    }

    async fn set_runtime_mode(&mut self, mode: RuntimeMode) -> Result<(), HardwareError> {
        self.write_line(&protocol::encode_mode(mode)).await
    }
}
