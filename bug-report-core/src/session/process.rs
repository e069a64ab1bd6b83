use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::processing::ring_buffer::RingBuffer;
use crate::traits::encoder::{EncoderProcess, ProcessExit};

const STDERR_TAIL_LINES: usize = 64;

/// An OS child process supervised as an encoder.
///
/// stdin is the frame pipe, stdout is discarded, stderr is drained on a
/// background thread into a bounded tail used for crash diagnostics. The
/// process is killed and reaped on drop if it is still running.
pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: Arc<Mutex<RingBuffer<String>>>,
    stderr_reader: Option<thread::JoinHandle<()>>,
    exit: Option<ProcessExit>,
}

impl ChildProcess {
    pub fn spawn(mut command: Command) -> io::Result<Self> {
        command.stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::piped());
        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        let stderr_tail = Arc::new(Mutex::new(RingBuffer::new(STDERR_TAIL_LINES)));

        let stderr_reader = match child.stderr.take() {
            Some(stderr) => {
                let tail = Arc::clone(&stderr_tail);
                let spawned = thread::Builder::new()
                    .name("encoder-stderr".into())
                    .spawn(move || {
                        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                            log::debug!(target: "encoder", "{}", line);
                            tail.lock().push(line);
                        }
                    });
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            child,
            stdin,
            stderr_tail,
            stderr_reader,
            exit: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Polls for exit until `timeout` elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ProcessExit>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit) = self.try_exit()? {
                return Ok(Some(exit));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn record_exit(&mut self, exit: ProcessExit) -> ProcessExit {
        self.exit = Some(exit);
        // Give the reader a moment to drain the last lines. A grandchild
        // holding the pipe open must not block us, so never join blindly.
        if let Some(reader) = self.stderr_reader.take() {
            let deadline = Instant::now() + Duration::from_millis(200);
            while !reader.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if reader.is_finished() {
                let _ = reader.join();
            }
        }
        exit
    }
}

impl EncoderProcess for ChildProcess {
    fn take_input(&mut self) -> Option<Box<dyn Write + Send>> {
        self.stdin.take().map(|stdin| Box::new(stdin) as Box<dyn Write + Send>)
    }

    fn try_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        match self.child.try_wait()? {
            Some(status) => Ok(Some(self.record_exit(ProcessExit { code: status.code() }))),
            None => Ok(None),
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        self.stdin = None;
        match self.child.kill() {
            Ok(()) => {}
            // Already exited but not yet reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        let status = self.child.wait()?;
        self.record_exit(ProcessExit { code: status.code() });
        Ok(())
    }

    fn diagnostics(&self) -> String {
        self.stderr_tail.lock().snapshot().join("\n")
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            if let Err(e) = self.kill() {
                log::warn!("failed to terminate encoder process {}: {}", self.child.id(), e);
            }
        }
    }
}
