//! Listener that talks to the terminal: progress on stdout, errors on stderr.

use std::io::{self, Write};
use std::sync::Mutex;

use pistream_core::{Stage, TerminationCause};
use pistream_session::ConnectionListener;
use tracing::{debug, info};

type Sink = Box<dyn Write + Send>;

pub struct ConsoleListener {
    out: Mutex<Sink>,
    err: Mutex<Sink>,
}

impl ConsoleListener {
    pub fn stdio() -> Self {
        Self::with_writers(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    pub fn with_writers(out: Sink, err: Sink) -> Self {
        Self { out: Mutex::new(out), err: Mutex::new(err) }
    }

    fn write(sink: &Mutex<Sink>, line: &str) {
        let mut sink = sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        // the terminal going away is no reason to stop streaming
        let _ = writeln!(sink, "{line}");
        let _ = sink.flush();
    }
}

impl ConnectionListener for ConsoleListener {
    fn stage_starting(&self, stage: Stage) {
        Self::write(&self.out, &format!("Starting {}", stage.name()));
    }

    fn stage_complete(&self, stage: Stage) {
        debug!("Stage '{}' complete", stage);
    }

    fn stage_failed(&self, stage: Stage) {
        self.display_error("Connection Error", &format!("Starting {} failed", stage.name()));
    }

    fn connection_started(&self) {
        info!("Streaming; press ctrl-c to stop");
    }

    fn connection_terminated(&self, cause: &TerminationCause) {
        if cause.is_unexpected() {
            self.display_error("Connection Terminated", "The connection failed unexpectedly");
        } else {
            debug!("Connection ended: {}", cause);
        }
    }

    fn display_message(&self, text: &str) {
        Self::write(&self.out, text);
    }

    fn display_error(&self, title: &str, text: &str) {
        Self::write(&self.err, &format!("{title} {text}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn console() -> (ConsoleListener, Captured, Captured) {
        let (out, err) = (Captured::default(), Captured::default());
        (ConsoleListener::with_writers(Box::new(out.clone()), Box::new(err.clone())), out, err)
    }

    #[test]
    fn stages_go_to_stdout() {
        let (console, out, err) = console();
        console.stage_starting(Stage::RtspHandshake);
        console.stage_complete(Stage::RtspHandshake);
        assert_eq!(out.text(), "Starting RTSP handshake\n");
        assert!(err.text().is_empty());
    }

    #[test]
    fn stage_failure_and_unexpected_end_go_to_stderr() {
        let (console, _out, err) = console();
        console.stage_failed(Stage::VideoStreamInit);
        console.connection_terminated(&TerminationCause::StageFailed {
            stage: Stage::VideoStreamInit,
            reason: "refused".into(),
        });
        assert_eq!(
            err.text(),
            "Connection Error Starting video stream failed\n\
             Connection Terminated The connection failed unexpectedly\n"
        );
    }

    #[test]
    fn local_stop_is_quiet() {
        let (console, out, err) = console();
        console.connection_terminated(&TerminationCause::LocalStop);
        console.connection_terminated(&TerminationCause::Interrupted);
        assert!(out.text().is_empty() && err.text().is_empty());
    }

    #[test]
    fn transient_messages_print_like_messages() {
        let (console, out, _err) = console();
        console.display_transient_message("Host is busy");
        assert_eq!(out.text(), "Host is busy\n");
    }
}
