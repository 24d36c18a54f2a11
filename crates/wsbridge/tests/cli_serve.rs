#![cfg(all(unix, feature = "cli"))]

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral port should bind");
    listener.local_addr().expect("bound listener has an address")
}

fn spawn_server(addr: SocketAddr, extra: &[&str], command: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_wsbridge"))
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg("--listen")
        .arg(addr.to_string())
        .args(extra)
        .arg("--")
        .args(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start")
}

async fn wait_for_connect(addr: SocketAddr, timeout: Duration) -> io::Result<Client> {
    let url = format!("ws://{addr}/");
    let start = Instant::now();
    loop {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => return Ok(ws),
            Err(err) => {
                if start.elapsed() >= timeout {
                    return Err(io::Error::other(format!("connect timeout: {err}")));
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
    }
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("message should arrive")
        .expect("stream should stay open")
        .expect("message should decode")
}

fn interrupt(child: &Child) {
    let status = Command::new("kill")
        .arg("-INT")
        .arg(child.id().to_string())
        .status()
        .expect("kill should run");
    assert!(status.success());
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::process::ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("server status should be readable") {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("server did not exit within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[tokio::test]
async fn serve_echoes_text_lines_through_cat() {
    let addr = free_addr();
    let mut server = spawn_server(addr, &[], &["cat"]);

    let mut client = wait_for_connect(addr, Duration::from_secs(5))
        .await
        .expect("client should connect to server");

    client
        .send(Message::Text("hello".into()))
        .await
        .expect("text should send");
    assert_eq!(next_message(&mut client).await, Message::Text("hello".to_string()));

    client.close(None).await.expect("close should send");

    interrupt(&server);
    let status = wait_with_timeout(&mut server, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn serve_sends_one_message_per_line_and_closes_on_exit() {
    let addr = free_addr();
    let mut server = spawn_server(addr, &[], &["sh", "-c", "printf 'a\\nb\\n'"]);

    let mut client = wait_for_connect(addr, Duration::from_secs(5))
        .await
        .expect("client should connect to server");

    assert_eq!(next_message(&mut client).await, Message::Text("a".to_string()));
    assert_eq!(next_message(&mut client).await, Message::Text("b".to_string()));
    assert!(matches!(next_message(&mut client).await, Message::Close(_)));

    interrupt(&server);
    let status = wait_with_timeout(&mut server, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn interrupt_terminates_live_processes() {
    let addr = free_addr();
    let mut server = spawn_server(addr, &["--binary"], &["sleep", "30"]);

    let _client = wait_for_connect(addr, Duration::from_secs(5))
        .await
        .expect("client should connect to server");
    tokio::time::sleep(Duration::from_millis(200)).await;

    interrupt(&server);
    let status = wait_with_timeout(&mut server, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
}

#[test]
fn serve_without_command_is_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_wsbridge"))
        .arg("serve")
        .output()
        .expect("serve command should run");
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
}
