use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_serial::{SerialPort, SerialStream};
use tracing::info;

/// How long the break condition is held, and the settle time after it
pub const BREAK_HOLD: Duration = Duration::from_millis(500);

/// Abstraction for the physical bus line (serial port or in-memory pipe)
pub trait BusLine: AsyncRead + AsyncWrite + Send + Unpin {
    /// Assert or release a break condition on the line
    fn set_break(&mut self, asserted: bool) -> io::Result<()>;
}

impl BusLine for SerialStream {
    fn set_break(&mut self, asserted: bool) -> io::Result<()> {
        let result = if asserted {
            SerialPort::set_break(self)
        } else {
            SerialPort::clear_break(self)
        };
        result.map_err(io::Error::from)
    }
}

/// In-memory line used by simulations; break has no effect
impl BusLine for DuplexStream {
    fn set_break(&mut self, _asserted: bool) -> io::Result<()> {
        Ok(())
    }
}

impl<T: BusLine + ?Sized> BusLine for Box<T> {
    fn set_break(&mut self, asserted: bool) -> io::Result<()> {
        (**self).set_break(asserted)
    }
}

/// Reset the remote controller by holding a break on the line.
///
/// Runs once after the port is opened, before any frame is sent.
pub async fn reset_line<L: BusLine + ?Sized>(line: &mut L) -> io::Result<()> {
    info!("W-Bus: resetting line");
    line.set_break(true)?;
    tokio::time::sleep(BREAK_HOLD).await;
    line.set_break(false)?;
    tokio::time::sleep(BREAK_HOLD).await;
    Ok(())
}
