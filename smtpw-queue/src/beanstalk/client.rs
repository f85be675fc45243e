//! beanstalkd client connection.

use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use smtpw_common::{incoming, outgoing};

use super::reply::Reply;
use crate::{Job, JobId, JobStats, Queue, QueueError, Result};

/// Initial size of the read buffer for replies.
const BUFFER_SIZE: usize = 8192;

/// Upper bound for the read buffer; a reserved job carries its attachments.
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Longest tube name the server accepts.
const MAX_TUBE_NAME: usize = 200;

/// A beanstalkd connection speaking the text protocol.
pub struct BeanstalkClient {
    stream: TcpStream,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl BeanstalkClient {
    /// Connects to a beanstalkd server at `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
        })
    }

    /// Sends a command line and reads the reply.
    async fn command(&mut self, command: &str) -> Result<Reply> {
        outgoing!("{command}");
        self.stream
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{reply:?}");
                return Ok(reply);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(QueueError::Parse(format!(
                        "Reply too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let n = self
                .stream
                .read(&mut self.buffer[self.buffer_pos..])
                .await?;
            if n == 0 {
                return Err(QueueError::ConnectionClosed);
            }
            self.buffer_pos += n;
        }
    }
}

/// Tube names are restricted so they can never smuggle a second command.
fn check_tube(tube: &str) -> Result<()> {
    let valid = !tube.is_empty()
        && tube.len() <= MAX_TUBE_NAME
        && !tube.starts_with('-')
        && tube
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-+/;.$_()".contains(c));

    if valid {
        Ok(())
    } else {
        Err(QueueError::InvalidTube(tube.to_string()))
    }
}

fn unexpected(command: &'static str, reply: Reply) -> QueueError {
    match reply {
        Reply::Error(error) => QueueError::Server(error),
        other => QueueError::UnexpectedReply {
            command,
            reply: format!("{other:?}"),
        },
    }
}

#[async_trait]
impl Queue for BeanstalkClient {
    async fn use_tube(&mut self, tube: &str) -> Result<()> {
        check_tube(tube)?;
        match self.command(&format!("use {tube}")).await? {
            Reply::Using(_) => Ok(()),
            reply => Err(unexpected("use", reply)),
        }
    }

    async fn watch(&mut self, tube: &str) -> Result<usize> {
        check_tube(tube)?;
        match self.command(&format!("watch {tube}")).await? {
            Reply::Watching(count) => Ok(count),
            reply => Err(unexpected("watch", reply)),
        }
    }

    async fn ignore(&mut self, tube: &str) -> Result<usize> {
        check_tube(tube)?;
        match self.command(&format!("ignore {tube}")).await? {
            Reply::Watching(count) => Ok(count),
            Reply::NotIgnored => Err(QueueError::NotIgnored(tube.to_string())),
            reply => Err(unexpected("ignore", reply)),
        }
    }

    async fn put(
        &mut self,
        body: &[u8],
        priority: u32,
        delay: Duration,
        ttr: Duration,
    ) -> Result<JobId> {
        let header = format!(
            "put {priority} {} {} {}",
            delay.as_secs(),
            ttr.as_secs().max(1),
            body.len()
        );
        outgoing!("{header}");

        let mut data = Vec::with_capacity(header.len() + body.len() + 4);
        data.extend_from_slice(header.as_bytes());
        data.extend_from_slice(b"\r\n");
        data.extend_from_slice(body);
        data.extend_from_slice(b"\r\n");
        self.stream.write_all(&data).await?;

        match self.read_reply().await? {
            Reply::Inserted(id) => Ok(id),
            Reply::Buried(Some(id)) => Err(QueueError::Server(format!(
                "Job {id} was buried on insert, server is out of memory"
            ))),
            reply => Err(unexpected("put", reply)),
        }
    }

    async fn reserve(&mut self, timeout: Duration) -> Result<Job> {
        match self
            .command(&format!("reserve-with-timeout {}", timeout.as_secs()))
            .await?
        {
            Reply::Reserved(job) => Ok(job),
            Reply::TimedOut => Err(QueueError::TimedOut),
            Reply::DeadlineSoon => Err(QueueError::DeadlineSoon),
            reply => Err(unexpected("reserve-with-timeout", reply)),
        }
    }

    async fn delete(&mut self, id: JobId) -> Result<()> {
        match self.command(&format!("delete {id}")).await? {
            Reply::Deleted => Ok(()),
            Reply::NotFound => Err(QueueError::NotFound(id)),
            reply => Err(unexpected("delete", reply)),
        }
    }

    async fn bury(&mut self, id: JobId, priority: u32) -> Result<()> {
        match self.command(&format!("bury {id} {priority}")).await? {
            Reply::Buried(_) => Ok(()),
            Reply::NotFound => Err(QueueError::NotFound(id)),
            reply => Err(unexpected("bury", reply)),
        }
    }

    async fn release(&mut self, id: JobId, priority: u32, delay: Duration) -> Result<()> {
        match self
            .command(&format!("release {id} {priority} {}", delay.as_secs()))
            .await?
        {
            Reply::Released => Ok(()),
            Reply::Buried(_) => Err(QueueError::Server(format!(
                "Job {id} was buried on release, server is out of memory"
            ))),
            Reply::NotFound => Err(QueueError::NotFound(id)),
            reply => Err(unexpected("release", reply)),
        }
    }

    async fn stats_job(&mut self, id: JobId) -> Result<JobStats> {
        match self.command(&format!("stats-job {id}")).await? {
            Reply::Ok(body) => {
                let text = std::str::from_utf8(&body)
                    .map_err(|e| QueueError::Parse(format!("stats-job body: {e}")))?;
                JobStats::parse(text)
            }
            Reply::NotFound => Err(QueueError::NotFound(id)),
            reply => Err(unexpected("stats-job", reply)),
        }
    }

    async fn kick(&mut self, bound: u32) -> Result<u32> {
        match self.command(&format!("kick {bound}")).await? {
            Reply::Kicked(count) => Ok(count),
            reply => Err(unexpected("kick", reply)),
        }
    }

    async fn quit(&mut self) -> Result<()> {
        outgoing!("quit");
        self.stream.write_all(b"quit\r\n").await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
