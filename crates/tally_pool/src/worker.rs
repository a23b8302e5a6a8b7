//! Worker side of the pool.

use std::cell::RefCell;
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::sync::Arc;

use tally_core::{catch_panic, Engine, ExitStatus, ModuleLoader, PluginRegistry};

use crate::protocol::{
    ControllerMessage, FramedReader, FramedWriter, MessageSink, MessageSource, ProtocolError,
    WorkerMessage,
};
use crate::resident_bytes;

/// Connect back to the controller listening on `addr`.
pub fn connect(
    addr: SocketAddr,
) -> Result<(FramedReader<TcpStream>, FramedWriter<TcpStream>), ProtocolError> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    let reader = stream.try_clone()?;
    Ok((FramedReader::new(reader), FramedWriter::new(stream)))
}

/// Runs the modules a controller assigns, one at a time.
pub struct Worker {
    loader: Arc<dyn ModuleLoader>,
    plugins: PluginRegistry,
}

/// Send side shared between the engine's event sink and the worker loop.
/// The first failure is kept and ends the loop.
struct Outbox<K> {
    sink: K,
    failure: Option<ProtocolError>,
}

impl<K: MessageSink<WorkerMessage>> Outbox<K> {
    fn send(&mut self, message: &WorkerMessage) {
        if self.failure.is_none() {
            if let Err(error) = self.sink.send(message) {
                self.failure = Some(error);
            }
        }
    }
}

impl Worker {
    pub fn new(loader: Arc<dyn ModuleLoader>, plugins: PluginRegistry) -> Self {
        Worker { loader, plugins }
    }

    /// Serve one controller connection and return the status to exit with.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn serve<S, K>(&self, mut source: S, sink: K) -> ExitStatus
    where
        S: MessageSource<ControllerMessage>,
        K: MessageSink<WorkerMessage> + 'static,
    {
        let config = match source.recv() {
            Ok(Some(ControllerMessage::Initialize(config))) => config,
            Ok(None) => return ExitStatus::Success,
            Ok(Some(other)) => {
                tracing::error!(?other, "expected Initialize as the first message");
                return ExitStatus::UnexpectedError;
            }
            Err(error) => {
                tracing::error!(%error, "failed to read configuration");
                return ExitStatus::UnexpectedError;
            }
        };

        let pipeline = match self.plugins.pipeline(&config) {
            Ok(pipeline) => pipeline,
            Err(error) => {
                tracing::error!(%error, "plugin failed to load");
                return ExitStatus::PluginLoadError;
            }
        };

        let outbox = Rc::new(RefCell::new(Outbox {
            sink,
            failure: None,
        }));
        let events = Rc::clone(&outbox);
        let mut engine = Engine::new(pipeline, Arc::clone(&self.loader), move |event| {
            events.borrow_mut().send(&WorkerMessage::Event(event));
        });
        outbox.borrow_mut().send(&WorkerMessage::WaitingForTests);

        loop {
            if let Some(error) = outbox.borrow_mut().failure.take() {
                tracing::error!(%error, "lost connection to controller");
                return ExitStatus::UnexpectedError;
            }
            match source.recv() {
                Ok(Some(ControllerMessage::RunTests { module })) => {
                    if let Err(error) = catch_panic(|| engine.run_module(&module)) {
                        tracing::error!(%module, %error, "engine failure");
                        return ExitStatus::UnexpectedError;
                    }
                    if let Some(used) = resident_bytes().filter(|&used| used > config.memory_limit) {
                        tracing::info!(used, limit = config.memory_limit, "memory limit exceeded");
                        return ExitStatus::ExceededMemoryLimit;
                    }
                    outbox.borrow_mut().send(&WorkerMessage::WaitingForTests);
                }
                Ok(Some(ControllerMessage::Stop) | None) => {
                    engine.finish();
                    return ExitStatus::Success;
                }
                Ok(Some(ControllerMessage::Initialize(_))) => {
                    tracing::warn!("ignoring repeated Initialize");
                }
                Err(error) => {
                    tracing::error!(%error, "failed to read from controller");
                    return ExitStatus::UnexpectedError;
                }
            }
        }
    }
}
