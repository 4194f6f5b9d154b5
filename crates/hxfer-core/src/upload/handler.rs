//! Easy2 handler for one upload: streams the request body, collects the response.

use std::io::{self, Read};
use std::sync::Arc;

use curl::easy::{Handler, ReadError, WriteError};

use crate::task::{TaskContext, TaskKey, TaskState};
use crate::transport::ResponseHead;

use super::UploadListener;

pub(super) struct UploadHandler<K: TaskKey> {
    ctx: Arc<TaskContext<K, dyn UploadListener<K>>>,
    body: Box<dyn Read + Send>,
    pub(super) head: ResponseHead,
    pub(super) response: Vec<u8>,
    pub(super) sent: u64,
    pub(super) read_error: Option<io::Error>,
}

impl<K: TaskKey> UploadHandler<K> {
    pub(super) fn new(ctx: Arc<TaskContext<K, dyn UploadListener<K>>>, body: Box<dyn Read + Send>) -> Self {
        Self {
            ctx,
            body,
            head: ResponseHead::default(),
            response: Vec::new(),
            sent: 0,
            read_error: None,
        }
    }

    pub(super) fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.response).into_owned()
    }
}

impl<K: TaskKey> Handler for UploadHandler<K> {
    fn read(&mut self, data: &mut [u8]) -> Result<usize, ReadError> {
        // curl only asks for the body once the connection is up.
        if self.ctx.state() == TaskState::Started {
            self.ctx.set_state(TaskState::Connected);
        }
        match self.body.read(data) {
            Ok(n) => {
                if self.sent == 0 && self.ctx.state() == TaskState::Connected {
                    self.ctx.set_state(TaskState::Transferring);
                }
                self.sent += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.read_error = Some(e);
                Err(ReadError::Abort)
            }
        }
    }

    fn header(&mut self, data: &[u8]) -> bool {
        if self.head.status.is_none() && self.ctx.state() == TaskState::Started {
            self.ctx.set_state(TaskState::Connected);
        }
        self.head.observe(data);
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.response.extend_from_slice(data);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;
    use std::io::Cursor;

    struct Quiet;

    impl UploadListener<u8> for Quiet {
        fn on_complete(&self, _body: &str, _key: &u8) {}
        fn on_error(&self, _error: &TransferError, _key: &u8) {}
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk gone"))
        }
    }

    fn ctx() -> Arc<TaskContext<u8, dyn UploadListener<u8>>> {
        let ctx = Arc::new(TaskContext::<u8, dyn UploadListener<u8>>::new(9));
        ctx.set_listener(Arc::new(Quiet));
        ctx
    }

    #[test]
    fn streams_body_and_collects_response() {
        let mut h = UploadHandler::new(ctx(), Box::new(Cursor::new(b"hello".to_vec())));
        let mut buf = [0u8; 3];
        assert_eq!(h.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(h.read(&mut buf).unwrap(), 2);
        assert_eq!(h.read(&mut buf).unwrap(), 0);
        assert_eq!(h.sent, 5);
        h.header(b"HTTP/1.1 200 OK\r\n");
        h.write(b"{\"ok\":").unwrap();
        h.write(b"true}").unwrap();
        assert_eq!(h.head.status, Some(200));
        assert_eq!(h.response_text(), "{\"ok\":true}");
    }

    /// Body that records the task state seen on every read.
    struct Watching {
        ctx: Arc<TaskContext<u8, dyn UploadListener<u8>>>,
        seen: Arc<std::sync::Mutex<Vec<TaskState>>>,
        left: usize,
    }

    impl Read for Watching {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.seen.lock().unwrap().push(self.ctx.state());
            let n = self.left.min(buf.len());
            self.left -= n;
            Ok(n)
        }
    }

    #[test]
    fn upload_passes_through_connected_before_transferring() {
        let ctx = ctx();
        ctx.set_state(TaskState::Started);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let body = Watching {
            ctx: Arc::clone(&ctx),
            seen: Arc::clone(&seen),
            left: 6,
        };
        let mut h = UploadHandler::new(Arc::clone(&ctx), Box::new(body));
        let mut buf = [0u8; 4];
        assert_eq!(h.read(&mut buf).unwrap(), 4);
        assert_eq!(ctx.state(), TaskState::Transferring);
        assert_eq!(h.read(&mut buf).unwrap(), 2);
        h.header(b"HTTP/1.1 201 Created\r\n");
        assert_eq!(ctx.state(), TaskState::Transferring);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![TaskState::Connected, TaskState::Transferring]
        );
    }

    #[test]
    fn read_failure_aborts_and_is_kept() {
        let mut h = UploadHandler::new(ctx(), Box::new(Broken));
        let mut buf = [0u8; 8];
        assert!(h.read(&mut buf).is_err());
        assert_eq!(h.read_error.as_ref().map(|e| e.to_string()).as_deref(), Some("disk gone"));
    }
}
