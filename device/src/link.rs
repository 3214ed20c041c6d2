//! RTT channels as embedded-io-async byte streams for the ergot link

use embedded_io_async::{ErrorType, Read, Write};
use rtt_target::{DownChannel, UpChannel};

/// RTT never fails a transfer, it only moves fewer bytes
#[derive(Debug, Clone, Copy)]
pub struct LinkError;

impl embedded_io_async::Error for LinkError {
    fn kind(&self) -> embedded_io_async::ErrorKind {
        embedded_io_async::ErrorKind::Other
    }
}

/// Host -> device frames (RTT down channel)
pub struct LinkRx {
    down: &'static mut DownChannel,
}

impl ErrorType for LinkRx {
    type Error = LinkError;
}

impl Read for LinkRx {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        Ok(self.down.read(buf))
    }
}

/// Device -> host frames (RTT up channel)
pub struct LinkTx {
    up: &'static mut UpChannel,
}

impl ErrorType for LinkTx {
    type Error = LinkError;
}

impl Write for LinkTx {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, LinkError> {
        Ok(self.up.write(buf))
    }

    async fn flush(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Wrap an up/down channel pair
pub fn split(up: &'static mut UpChannel, down: &'static mut DownChannel) -> (LinkRx, LinkTx) {
    (LinkRx { down }, LinkTx { up })
}
