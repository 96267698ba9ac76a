use crate::error::LinkError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONSECUTIVE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Data(usize),
    Silent { missed: u32 },
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    consecutive_timeouts: u32,
    window: Duration,
    max_consecutive: u32,
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_CONSECUTIVE)
    }
}

impl LivenessMonitor {
    pub fn new(window: Duration, max_consecutive: u32) -> Self {
        Self {
            consecutive_timeouts: 0,
            window,
            max_consecutive: max_consecutive.max(1),
        }
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    pub fn budget(&self) -> Duration {
        self.window * self.max_consecutive
    }

    pub fn record_ready(&mut self) {
        self.consecutive_timeouts = 0;
    }

    pub fn record_timeout(&mut self) -> Result<u32, LinkError> {
        self.consecutive_timeouts += 1;
        if self.consecutive_timeouts >= self.max_consecutive {
            return Err(LinkError::ConnectionTimeout {
                elapsed: self.budget(),
            });
        }
        Ok(self.consecutive_timeouts)
    }

    // An empty read means the peer closed its side. Cancelling this future
    // while it waits loses no data.
    pub async fn wait_inbound<R>(&mut self, reader: &mut R, buf: &mut [u8]) -> Result<Wait, LinkError>
    where
        R: AsyncRead + Unpin,
    {
        match tokio::time::timeout(self.window, reader.read(buf)).await {
            Err(_) => {
                let missed = self.record_timeout()?;
                Ok(Wait::Silent { missed })
            }
            Ok(Ok(0)) => {
                self.record_ready();
                Err(LinkError::PeerDisconnected)
            }
            Ok(Ok(n)) => {
                self.record_ready();
                Ok(Wait::Data(n))
            }
            Ok(Err(err)) => Err(LinkError::Socket(err)),
        }
    }
}
