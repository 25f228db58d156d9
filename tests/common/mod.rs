#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use vroot_ftpd::auth::UserAccount;
use vroot_ftpd::{Server, ServerConfig};

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

const IO_LIMIT: Duration = Duration::from_secs(20);

/// A server on an ephemeral loopback port, rooted in a fresh temp dir.
pub struct TestServer {
    pub addr: SocketAddr,
    pub root: TempDir,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            control_port: 0,
            server_root: root.path().to_path_buf(),
            connection_timeout_secs: 5,
            users: vec![UserAccount::new(USER, PASSWORD)],
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run());
        Self { addr, root, task }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    pub async fn client(&self) -> FtpClient {
        FtpClient::connect(self.addr).await
    }

    pub async fn logged_in(&self) -> FtpClient {
        let mut client = self.client().await;
        client.login().await;
        client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Minimal FTP client speaking raw control lines.
pub struct FtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub greeting: (u16, String),
}

impl FtpClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
            greeting: (0, String::new()),
        };
        client.greeting = client.read_reply().await;
        client
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\r\n").as_bytes()).await;
    }

    async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = timeout(IO_LIMIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a reply")
            .unwrap();
        (n > 0).then(|| line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Reads one reply. Multi-line replies come back joined with `\n`.
    pub async fn read_reply(&mut self) -> (u16, String) {
        let first = self.read_line().await.expect("connection closed");
        let code: u16 = first[..3].parse().unwrap();
        let mut text = first[4..].to_string();
        if first.as_bytes()[3] == b'-' {
            let terminator = format!("{code} ");
            loop {
                let line = self.read_line().await.expect("connection closed");
                text.push('\n');
                if let Some(last) = line.strip_prefix(&terminator) {
                    text.push_str(last);
                    break;
                }
                text.push_str(&line);
            }
        }
        (code, text)
    }

    /// True once the server has closed the control connection.
    pub async fn is_closed(&mut self) -> bool {
        self.read_line().await.is_none()
    }

    pub async fn cmd(&mut self, line: &str) -> (u16, String) {
        self.send(line).await;
        self.read_reply().await
    }

    pub async fn code(&mut self, line: &str) -> u16 {
        self.cmd(line).await.0
    }

    pub async fn login(&mut self) {
        assert_eq!(self.code(&format!("USER {USER}")).await, 331);
        assert_eq!(self.code(&format!("PASS {PASSWORD}")).await, 230);
    }

    /// Sends PASV and connects to the advertised port.
    pub async fn pasv(&mut self) -> TcpStream {
        let (code, text) = self.cmd("PASV").await;
        assert_eq!(code, 227, "{text}");
        let inner = &text[text.find('(').unwrap() + 1..text.find(')').unwrap()];
        let n: Vec<u16> = inner.split(',').map(|p| p.parse().unwrap()).collect();
        let addr = format!("{}.{}.{}.{}:{}", n[0], n[1], n[2], n[3], n[4] * 256 + n[5]);
        TcpStream::connect(addr).await.unwrap()
    }

    /// Sends PORT for a fresh local listener the server will connect to.
    pub async fn port(&mut self) -> TcpListener {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (code, text) = self
            .cmd(&format!("PORT 127,0,0,1,{},{}", port >> 8, port & 0xff))
            .await;
        assert_eq!(code, 200, "{text}");
        listener
    }

    pub async fn retr(&mut self, path: &str) -> Vec<u8> {
        let mut data = self.pasv().await;
        let (code, text) = self.cmd(&format!("RETR {path}")).await;
        assert_eq!(code, 150, "{text}");
        let body = read_all(&mut data).await;
        assert_eq!(self.read_reply().await.0, 226);
        body
    }

    pub async fn stor(&mut self, path: &str, body: &[u8]) {
        self.upload(&format!("STOR {path}"), body).await;
    }

    pub async fn upload(&mut self, command: &str, body: &[u8]) {
        let mut data = self.pasv().await;
        let (code, text) = self.cmd(command).await;
        assert_eq!(code, 150, "{text}");
        data.write_all(body).await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        assert_eq!(self.read_reply().await.0, 226);
    }

    pub async fn list(&mut self, command: &str) -> String {
        let mut data = self.pasv().await;
        let (code, text) = self.cmd(command).await;
        assert_eq!(code, 150, "{text}");
        let body = read_all(&mut data).await;
        assert_eq!(self.read_reply().await.0, 226);
        String::from_utf8(body).unwrap()
    }

    pub async fn nlst(&mut self, command: &str) -> Vec<String> {
        self.list(command)
            .await
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut body = Vec::new();
    timeout(IO_LIMIT, stream.read_to_end(&mut body))
        .await
        .expect("timed out reading data connection")
        .unwrap();
    body
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
