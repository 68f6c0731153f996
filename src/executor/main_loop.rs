//! Primary message loop with idle handlers
//!
//! The loop drains posted tasks in order. Each time the queue runs dry it runs
//! the registered idle handlers once, then blocks for the next message. An idle
//! handler returning `false` is removed after it runs.

use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send>;
type IdleHandler = Box<dyn FnMut() -> bool + Send>;

enum Message {
    Run(Task),
    Wake,
    Quit,
}

/// Primary scheduling loop. Drive it with [`MainLoop::run`] or [`MainLoop::spawn`].
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Message>,
    idle_handlers: Arc<Mutex<Vec<IdleHandler>>>,
    thread_id: Arc<OnceLock<ThreadId>>,
}

/// Cloneable handle for posting work to a [`MainLoop`] from any thread
#[derive(Clone)]
pub struct MainLoopHandle {
    tx: mpsc::UnboundedSender<Message>,
    idle_handlers: Arc<Mutex<Vec<IdleHandler>>>,
    thread_id: Arc<OnceLock<ThreadId>>,
}

impl MainLoop {
    /// Create a loop and its handle. Nothing runs until [`MainLoop::run`].
    pub fn new() -> (Self, MainLoopHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let idle_handlers = Arc::new(Mutex::new(Vec::new()));
        let thread_id = Arc::new(OnceLock::new());

        let handle = MainLoopHandle {
            tx,
            idle_handlers: idle_handlers.clone(),
            thread_id: thread_id.clone(),
        };

        (
            Self {
                rx,
                idle_handlers,
                thread_id,
            },
            handle,
        )
    }

    /// Run the loop on a new named thread
    pub fn spawn(name: &str) -> std::io::Result<MainLoopHandle> {
        let (main_loop, handle) = Self::new();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || main_loop.run())?;
        Ok(handle)
    }

    /// Run the loop on the current thread until [`MainLoopHandle::quit`] is
    /// called or every handle has been dropped.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run(mut self) {
        if self.thread_id.set(thread::current().id()).is_err() {
            warn!("Main loop already bound to another thread");
        }
        debug!("Main loop started");

        loop {
            match self.rx.try_recv() {
                Ok(Message::Run(task)) => task(),
                Ok(Message::Wake) => {}
                Ok(Message::Quit) => break,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    self.run_idle_handlers();
                    match self.rx.blocking_recv() {
                        Some(Message::Run(task)) => task(),
                        Some(Message::Wake) => {}
                        Some(Message::Quit) | None => break,
                    }
                }
            }
        }

        debug!("Main loop stopped");
    }

    fn run_idle_handlers(&self) {
        // Take the handlers out so a handler may register new ones without deadlocking.
        let mut handlers = match self.idle_handlers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if handlers.is_empty() {
            return;
        }

        handlers.retain_mut(|handler| handler());

        let mut guard = match self.idle_handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.append(&mut guard);
        *guard = handlers;
    }
}

impl MainLoopHandle {
    /// Queue a task on the loop. Returns `false` if the loop has stopped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Register a handler run the next time the loop goes idle. The handler
    /// stays registered for as long as it returns `true`.
    pub fn add_idle_handler<F>(&self, handler: F) -> bool
    where
        F: FnMut() -> bool + Send + 'static,
    {
        match self.idle_handlers.lock() {
            Ok(mut guard) => guard.push(Box::new(handler)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(handler)),
        }
        self.tx.send(Message::Wake).is_ok()
    }

    /// Whether the caller is running on the loop's thread
    pub fn is_loop_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    /// Ask the loop to stop after the tasks already queued
    pub fn quit(&self) {
        let _ = self.tx.send(Message::Quit);
    }
}
