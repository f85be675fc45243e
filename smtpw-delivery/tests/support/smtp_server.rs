//! Scripted SMTP relay for exercising [`smtpw_delivery::SmtpMailer`]
//!
//! Accepts connections on an ephemeral port, answers every command from a
//! fixed script and records what the client sent. The reply to `RCPT TO` is
//! configurable so rejections can be injected.

use std::{net::SocketAddr, sync::Arc};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// SMTP command received by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content between `DATA` and the terminating dot
    Content(String),
    Rset,
    Quit,
    Other(String),
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    task: JoinHandle<()>,
}

impl MockSmtpServer {
    /// Start a relay that accepts everything.
    pub async fn start() -> Self {
        Self::with_rcpt_reply(250, "2.1.5 Ok").await
    }

    /// Start a relay that answers `RCPT TO` with `code message`.
    pub async fn with_rcpt_reply(code: u16, message: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock relay");
        let addr = listener.local_addr().expect("mock relay address");
        let commands = Arc::new(Mutex::new(Vec::new()));
        let rcpt = format!("{code} {message}\r\n");

        let recorded = Arc::clone(&commands);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                // One client at a time; the mailer opens a connection per message
                let _ = handle_client(stream, &rcpt, &recorded).await;
            }
        });

        Self {
            addr,
            commands,
            task,
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.lock().clone()
    }

    /// The message content of the first completed `DATA`.
    pub fn content(&self) -> Option<String> {
        self.commands().into_iter().find_map(|command| match command {
            SmtpCommand::Content(content) => Some(content),
            _ => None,
        })
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_client(
    mut stream: TcpStream,
    rcpt: &str,
    commands: &Mutex<Vec<SmtpCommand>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(b"220 mock.example.com ESMTP\r\n").await?;

    while let Some(line) = lines.next_line().await? {
        let (verb, argument) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let verb = verb.to_ascii_uppercase();

        let (command, reply) = match verb.as_str() {
            "EHLO" => (
                SmtpCommand::Ehlo(argument.to_string()),
                "250-mock.example.com\r\n250 8BITMIME\r\n".to_string(),
            ),
            "MAIL" => (
                SmtpCommand::MailFrom(argument.to_string()),
                "250 2.1.0 Ok\r\n".to_string(),
            ),
            "RCPT" => (SmtpCommand::RcptTo(argument.to_string()), rcpt.to_string()),
            "DATA" => {
                commands.lock().push(SmtpCommand::Data);
                writer
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;

                let mut content = Vec::new();
                while let Some(data) = lines.next_line().await? {
                    if data == "." {
                        break;
                    }
                    content.push(data);
                }

                (
                    SmtpCommand::Content(content.join("\r\n")),
                    "250 2.0.0 Ok: queued\r\n".to_string(),
                )
            }
            "RSET" => (SmtpCommand::Rset, "250 2.0.0 Ok\r\n".to_string()),
            "QUIT" => {
                commands.lock().push(SmtpCommand::Quit);
                writer.write_all(b"221 2.0.0 Bye\r\n").await?;
                return Ok(());
            }
            _ => (
                SmtpCommand::Other(line.clone()),
                "502 5.5.2 Command not recognized\r\n".to_string(),
            ),
        };

        commands.lock().push(command);
        writer.write_all(reply.as_bytes()).await?;
    }

    Ok(())
}
