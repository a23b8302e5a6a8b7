//! Starting workers.

use std::ffi::OsString;
use std::io::{self, BufReader};
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use tally_core::RunConfig;

use crate::protocol::{read_frame, ControllerMessage, FramedWriter, MessageSink, ProtocolError};
use crate::{PoolError, PoolEvent, WorkerId};

/// Environment variable through which a spawned worker learns where the
/// controller listens.
pub const WORKER_ADDR_ENV: &str = "TALLY_WORKER_ADDR";

/// Creates workers for a [`Scheduler`](crate::Scheduler).
///
/// Everything a worker reports, including its exit, must be delivered on
/// `events`.
pub trait WorkerLauncher {
    fn launch(
        &mut self,
        worker: WorkerId,
        config: &RunConfig,
        events: Sender<PoolEvent>,
    ) -> Result<Box<dyn WorkerHandle>, PoolError>;
}

/// Controller end of one worker's channel.
pub trait WorkerHandle {
    fn send(&mut self, message: &ControllerMessage) -> Result<(), ProtocolError>;

    /// OS process id, when the worker is a process.
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Spawns workers as child processes connected over loopback TCP.
///
/// The child runs `program` with [`WORKER_ADDR_ENV`] set; its entry point is
/// expected to connect there and serve a [`Worker`](crate::Worker).
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    connect_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessLauncher {
            program: program.into(),
            args: Vec::new(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Launch copies of the running executable.
    pub fn current_exe() -> Result<Self, PoolError> {
        std::env::current_exe()
            .map(ProcessLauncher::new)
            .map_err(PoolError::Spawn)
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn accept(&self, listener: &TcpListener, child: &mut Child) -> Result<TcpStream, PoolError> {
        listener.set_nonblocking(true).map_err(PoolError::Spawn)?;
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false).map_err(PoolError::Spawn)?;
                    stream.set_nodelay(true).map_err(PoolError::Spawn)?;
                    return Ok(stream);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    if let Some(status) = child.try_wait().map_err(PoolError::Spawn)? {
                        return Err(PoolError::ExitedEarly(status.code()));
                    }
                    if Instant::now() >= deadline {
                        // Best effort: the child is abandoned either way.
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(PoolError::ConnectTimeout(self.connect_timeout));
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(error) => return Err(PoolError::Spawn(error)),
            }
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    #[tracing::instrument(level = "debug", skip_all, fields(worker = %worker))]
    fn launch(
        &mut self,
        worker: WorkerId,
        _config: &RunConfig,
        events: Sender<PoolEvent>,
    ) -> Result<Box<dyn WorkerHandle>, PoolError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(PoolError::Spawn)?;
        let addr = listener.local_addr().map_err(PoolError::Spawn)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ADDR_ENV, addr.to_string())
            .stdin(Stdio::null())
            .spawn()
            .map_err(PoolError::Spawn)?;
        let pid = child.id();

        let stream = self.accept(&listener, &mut child)?;
        let reader = stream.try_clone().map_err(PoolError::Spawn)?;
        thread::Builder::new()
            .name(format!("tally-worker-{worker}"))
            .spawn(move || forward(worker, reader, child, &events))
            .map_err(PoolError::Spawn)?;

        tracing::debug!(pid, "worker connected");
        Ok(Box::new(ProcessHandle {
            writer: FramedWriter::new(stream),
            pid,
        }))
    }
}

/// Relay a worker's frames until its connection closes, then report how
/// the process exited.
fn forward(worker: WorkerId, stream: TcpStream, mut child: Child, events: &Sender<PoolEvent>) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_frame(&mut reader) {
            Ok(Some(message)) => {
                if events.send(PoolEvent::Message { worker, message }).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%worker, %error, "dropping worker connection");
                let _ = child.kill();
                break;
            }
        }
    }
    let code = match child.wait() {
        Ok(status) => status.code(),
        Err(error) => {
            tracing::warn!(%worker, %error, "failed to reap worker");
            None
        }
    };
    let _ = events.send(PoolEvent::Exited { worker, code });
}

struct ProcessHandle {
    writer: FramedWriter<TcpStream>,
    pid: u32,
}

impl WorkerHandle for ProcessHandle {
    fn send(&mut self, message: &ControllerMessage) -> Result<(), ProtocolError> {
        self.writer.send(message)
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // The reader thread holds a clone of the socket, so close our half
        // explicitly; the worker sees end of stream and exits.
        let _ = self.writer.get_ref().shutdown(Shutdown::Write);
    }
}
