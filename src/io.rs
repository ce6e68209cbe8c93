// Copyright 2024 The rbldns developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The blocking UDP I/O provider.
//!
//! One listener thread reads datagrams under a short timeout (so it can
//! observe group shutdown) and hands each one to a worker pool; workers
//! run the server's message handling and send the response on a shared
//! socket. Receive failures end the listener; send failures are logged
//! and counted, and processing continues.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::error;

use crate::metrics;
use crate::server::Server;
use crate::thread::{self as thread_group, ThreadGroup, ThreadPool};

/// Configuration options for the [`UdpServer`].
pub struct UdpConfig {
    /// The receive timeout; the maximum interval between shutdown
    /// checks in the listener.
    pub read_timeout: Duration,

    /// The receive buffer size. UDP DNS messages are at most 512
    /// octets without EDNS0, which this server does not speak.
    pub buffer_size: usize,

    /// The number of worker threads handling queries.
    pub workers: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            buffer_size: 512,
            workers: 4,
        }
    }
}

/// A bound UDP socket plus the threads serving it.
pub struct UdpServer {
    socket: UdpSocket,
    config: UdpConfig,
}

impl UdpServer {
    /// Binds a UDP socket to `addr` in preparation, but does not start
    /// serving.
    pub fn bind(addr: SocketAddr, config: UdpConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        Ok(Self { socket, config })
    }

    /// Returns the bound local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Starts the listener and its worker pool on `group`. Shutting
    /// down the group stops the server.
    pub fn start(
        self,
        server: &Arc<Server>,
        group: &Arc<ThreadGroup>,
    ) -> Result<(), thread_group::Error> {
        let pool = ThreadPool::start(group, "udp", self.config.workers)?;
        let socket = Arc::new(self.socket);
        let server = server.clone();
        let listener_group = group.clone();
        let buffer_size = self.config.buffer_size;

        group.spawn("udp listener", move || {
            log_io_errors(run_listener(
                &listener_group,
                &pool,
                &server,
                &socket,
                buffer_size,
            ));
            // Wake idle workers so group shutdown can complete.
            pool.shut_down();
        })
    }
}

/// The UDP receive/dispatch loop.
fn run_listener(
    group: &Arc<ThreadGroup>,
    pool: &Arc<ThreadPool>,
    server: &Arc<Server>,
    socket: &Arc<UdpSocket>,
    buffer_size: usize,
) -> io::Result<()> {
    let mut buf = vec![0u8; buffer_size];

    loop {
        if group.is_shutting_down() {
            return Ok(());
        }

        // Receive a datagram. Timeouts and interruptions loop back to
        // the shutdown check above.
        let (received_len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted,
                ) =>
            {
                continue
            }
            Err(e) => return Err(e),
        };

        let datagram = buf[..received_len].to_vec();
        let task_server = server.clone();
        let task_socket = socket.clone();
        let task = Box::new(move || {
            if let Some(response) = task_server.handle_message(&datagram, src.ip()) {
                if let Err(e) = task_socket.send_to(&response, src) {
                    error!("failed to send response to {}: {}", src, e);
                    metrics::record_error("unknown", "write_error");
                }
            }
        });
        match pool.submit(task) {
            Ok(()) => (),
            Err(thread_group::Error::ShuttingDown) => return Ok(()),
            Err(thread_group::Error::Io(e)) => return Err(e),
        }
    }
}

/// Logs errors if a task exits with an I/O error.
fn log_io_errors<T>(result: io::Result<T>) {
    if let Err(e) = result {
        let current_thread = thread::current();
        let thread_name = current_thread.name().unwrap_or("anonymous thread");
        error!("I/O error in thread {}: {}", thread_name, e);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
