//! Dispatcher (C9): two cooperative event loops, each on its own thread,
//! with an explicit wake channel for reconfiguration and orderly shutdown.
//!
//! Grounded on `dispatchers.c`'s `InputDispatcher`/`UserNetDispatcher`
//! pair (one `ev_loop` per thread, an `exitPipe` wake source, `sync` mode
//! collapsing the network loop onto the caller's thread) but built on
//! `mio` rather than libev, matching this crate's reactor dependency.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, info};

const WAKE_TOKEN: Token = Token(usize::MAX);

/// Callback invoked when a registered fd becomes readable/writable.
pub type WatcherFn = Box<dyn FnMut() + Send>;

/// One cooperative event loop, identified by role ("Input" or
/// "Network/User" per spec.md §4.9). Owns its `mio::Poll` and a wake
/// handle any thread can use to interrupt a blocking `poll`.
pub struct EventLoop {
    name: &'static str,
    poll: Poll,
    waker: Arc<Waker>,
    watchers: HashMap<Token, WatcherFn>,
    next_token: usize,
    exiting: Arc<AtomicBool>,
}

impl EventLoop {
    pub fn new(name: &'static str) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(EventLoop {
            name,
            poll,
            waker,
            watchers: HashMap::new(),
            next_token: 0,
            exiting: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// A shared handle to this loop's exit flag, so an owner that has
    /// moved the `EventLoop` itself onto another thread (e.g.
    /// [`Dispatcher::start`]) can still request its exit.
    pub fn exiting_handle(&self) -> Arc<AtomicBool> {
        self.exiting.clone()
    }

    /// Registers `fd` for readiness and returns a token that can later be
    /// passed to [`EventLoop::remove_watcher`].
    pub fn add_watcher(&mut self, fd: RawFd, interest: Interest, callback: WatcherFn) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, interest)?;
        self.watchers.insert(token, callback);
        Ok(token)
    }

    pub fn remove_watcher(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))?;
        self.watchers.remove(&token);
        Ok(())
    }

    /// Breaks a blocking `run` for reconfiguration or shutdown (the
    /// `write(exitPipe[1], ...)` equivalent).
    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }

    pub fn request_exit(&self) {
        self.exiting.store(true, Ordering::SeqCst);
        let _ = self.wake();
    }

    /// Runs until [`EventLoop::request_exit`] is called from any thread.
    pub fn run(&mut self) {
        info!(loop_name = self.name, "event loop started");
        let mut events = Events::with_capacity(128);
        loop {
            if self.exiting.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::warn!(loop_name = self.name, error = %e, "poll failed");
                break;
            }
            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    continue;
                }
                if let Some(cb) = self.watchers.get_mut(&event.token()) {
                    cb();
                }
            }
        }
        info!(loop_name = self.name, "event loop finished");
    }
}

/// Owns the Input and Network/User loops and their threads, per spec.md
/// §4.9/§5. In `sync` mode the Network/User loop is never spawned on its
/// own thread; the caller is expected to call
/// [`Dispatcher::run_network_sync`] on the main thread instead.
pub struct Dispatcher {
    input: Option<EventLoop>,
    network: Option<EventLoop>,
    input_waker: Arc<Waker>,
    network_waker: Arc<Waker>,
    input_exiting: Arc<AtomicBool>,
    network_exiting: Arc<AtomicBool>,
    input_thread: Option<JoinHandle<()>>,
    network_thread: Option<JoinHandle<()>>,
    sync: bool,
}

impl Dispatcher {
    pub fn new(sync: bool) -> io::Result<Self> {
        let input = EventLoop::new("Input")?;
        let network = EventLoop::new("Network/User")?;
        let input_waker = input.waker();
        let network_waker = network.waker();
        let input_exiting = input.exiting_handle();
        let network_exiting = network.exiting_handle();
        Ok(Dispatcher {
            input: Some(input),
            network: Some(network),
            input_waker,
            network_waker,
            input_exiting,
            network_exiting,
            input_thread: None,
            network_thread: None,
            sync,
        })
    }

    pub fn input_mut(&mut self) -> &mut EventLoop {
        self.input.as_mut().expect("dispatcher already started")
    }

    pub fn network_mut(&mut self) -> &mut EventLoop {
        self.network.as_mut().expect("dispatcher already started")
    }

    /// Spawns the Input loop thread, and the Network/User loop thread
    /// unless `sync` was requested at construction (spec.md §5: "Startup
    /// may optionally collapse Network/User into the main thread").
    pub fn start(&mut self) {
        let mut input = self.input.take().expect("dispatcher already started");
        self.input_thread = Some(thread::Builder::new()
            .name("InputDispatcher".into())
            .spawn(move || input.run())
            .expect("spawn input dispatcher"));

        if !self.sync {
            let mut network = self.network.take().expect("dispatcher already started");
            self.network_thread = Some(thread::Builder::new()
                .name("NetDispatcher".into())
                .spawn(move || network.run())
                .expect("spawn network dispatcher"));
        }
    }

    /// Runs the Network/User loop on the calling thread; only valid in
    /// `sync` mode, after [`Dispatcher::start`].
    pub fn run_network_sync(&mut self) {
        debug_assert!(self.sync, "run_network_sync requires sync mode");
        if let Some(mut network) = self.network.take() {
            network.run();
        }
    }

    /// Shutdown sequence from spec.md §4.9: stop Network/User loop first
    /// and join it, then stop Input and join it. Closing fds is the
    /// caller's responsibility once every watcher has been torn down.
    ///
    /// Setting the exit flag before waking matters: a bare wake only
    /// interrupts one blocking `poll` call, and `EventLoop::run` goes right
    /// back to polling unless it sees `exiting` set on the next lap.
    pub fn stop(&mut self) {
        self.network_exiting.store(true, Ordering::SeqCst);
        self.network_waker.wake().ok();
        if let Some(handle) = self.network_thread.take() {
            handle.join().ok();
        }

        self.input_exiting.store(true, Ordering::SeqCst);
        self.input_waker.wake().ok();
        if let Some(handle) = self.input_thread.take() {
            handle.join().ok();
        }
        debug!("dispatcher stopped");
    }
}

/// Off-reactor sleep helper used by tests that need to let a spawned loop
/// thread reach its first `poll` before exercising it.
#[cfg(test)]
pub(crate) fn settle() {
    thread::sleep(Duration::from_millis(20));
}
