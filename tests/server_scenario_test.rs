//! End-to-end games over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use strictly_arena::{GamePhase, GameServer, LifecycleController, ServerConfig, ServerMessage};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("send");
    }

    async fn next(&mut self) -> Option<String> {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("server answered in time")
            .ok()
            .flatten()
    }

    async fn expect(&mut self, expected: &str) {
        let line = self.next().await.expect("connection open");
        assert_eq!(line, expected);
        assert!(ServerMessage::decode(&line).is_some(), "unparseable {line}");
    }

    async fn expect_all(&mut self, expected: &[&str]) {
        for line in expected {
            self.expect(line).await;
        }
    }

    async fn expect_closed(&mut self) {
        assert_eq!(self.next().await, None);
    }
}

struct Game {
    x: Client,
    o: Client,
    lifecycle: Arc<LifecycleController>,
    server: JoinHandle<()>,
}

async fn spawn_server(
    config: ServerConfig,
) -> (SocketAddr, Arc<LifecycleController>, JoinHandle<()>) {
    let server = GameServer::bind(config).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let lifecycle = server.lifecycle().clone();
    let handle = tokio::spawn(async move {
        server.run().await.expect("server run");
    });
    (addr, lifecycle, handle)
}

async fn wait_registered(lifecycle: &LifecycleController, count: usize) {
    timeout(WAIT, async {
        while lifecycle.registry().registered() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("registration");
}

async fn start_game(config: ServerConfig) -> Game {
    let (addr, lifecycle, server) = spawn_server(config).await;
    let mut x = Client::connect(addr).await;
    wait_registered(&lifecycle, 1).await;
    let mut o = Client::connect(addr).await;

    x.expect_all(&["START", "SYMBOL X", "BOARD .........", "YOUR_TURN"])
        .await;
    o.expect_all(&["START", "SYMBOL O", "BOARD ........."]).await;
    Game {
        x,
        o,
        lifecycle,
        server,
    }
}

fn local() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0)
}

#[tokio::test]
async fn test_move_update_and_occupied() {
    let mut game = start_game(local()).await;

    game.x.send("5").await;
    game.x.expect_all(&["MOVE_OK 5 X", "BOARD ....X...."]).await;
    game.o
        .expect_all(&["UPDATE 5 X", "BOARD ....X....", "YOUR_TURN"])
        .await;

    game.o.send("5").await;
    game.o.expect("INVALID").await;

    game.x.send("1").await;
    game.x.expect("NOT_YOUR_TURN").await;

    game.o.send("hello").await;
    game.o.expect("INVALID").await;

    // Turn is checked before the token is parsed.
    game.x.send("abc").await;
    game.x.expect("NOT_YOUR_TURN").await;

    game.o.send("move 3").await;
    game.o.expect("INVALID").await;
}

#[tokio::test]
async fn test_x_wins_top_row_then_restart() {
    let mut game = start_game(local()).await;

    for (x_move, o_move) in [("1", "4"), ("2", "5")] {
        game.x.send(x_move).await;
        game.x.next().await;
        game.x.next().await;
        game.o.expect(&format!("UPDATE {x_move} X")).await;
        game.o.next().await;
        game.o.expect("YOUR_TURN").await;

        game.o.send(o_move).await;
        game.o.expect(&format!("MOVE_OK {o_move} O")).await;
        game.o.next().await;
        game.x.expect(&format!("UPDATE {o_move} O")).await;
        game.x.next().await;
        game.x.expect("YOUR_TURN").await;
    }

    game.x.send("3").await;
    game.x
        .expect_all(&["MOVE_OK 3 X", "BOARD XXXOO....", "YOU_WIN"])
        .await;
    game.o
        .expect_all(&["UPDATE 3 X", "BOARD XXXOO....", "YOU_LOSE"])
        .await;

    game.o.send("restart").await;
    game.x
        .expect_all(&["START", "SYMBOL X", "BOARD .........", "YOUR_TURN"])
        .await;
    game.o
        .expect_all(&["START", "SYMBOL O", "BOARD ........."])
        .await;
    assert_eq!(game.lifecycle.arbiter().phase(), GamePhase::InProgress);

    game.x.send("1").await;
    game.x.expect("MOVE_OK 1 X").await;
}

#[tokio::test]
async fn test_quit_notifies_opponent_and_ends_server() {
    let mut game = start_game(local()).await;

    game.o.send("QUIT").await;
    game.x.expect("OPPONENT_QUIT").await;
    game.x.expect_closed().await;
    game.o.expect_closed().await;

    timeout(WAIT, game.server)
        .await
        .expect("server finishes once both players are gone")
        .expect("server task");
    assert_eq!(game.lifecycle.arbiter().phase(), GamePhase::Closed);
}

#[tokio::test]
async fn test_disconnect_counts_as_quit() {
    let Game { x, mut o, .. } = start_game(local()).await;
    drop(x);
    o.expect("OPPONENT_QUIT").await;
    o.expect_closed().await;
}

#[tokio::test]
async fn test_commands_before_start_are_rejected() {
    let (addr, lifecycle, _server) = spawn_server(local()).await;
    let mut x = Client::connect(addr).await;
    wait_registered(&lifecycle, 1).await;

    x.send("5").await;
    x.expect("INVALID").await;
    x.send("RESTART").await;
    x.expect("INVALID").await;
    assert_eq!(lifecycle.arbiter().phase(), GamePhase::WaitingForPeers);
    assert_eq!(lifecycle.arbiter().snapshot().moves, 0);
}

#[tokio::test]
async fn test_listener_stops_after_two_players() {
    let (addr, lifecycle, _server) = spawn_server(local()).await;
    let _x = Client::connect(addr).await;
    wait_registered(&lifecycle, 1).await;
    let _o = Client::connect(addr).await;
    wait_registered(&lifecycle, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Either refused outright, or accepted by the kernel and then reset.
    if let Ok(mut stream) = TcpStream::connect(addr).await {
        let mut buf = [0u8; 16];
        let read = timeout(WAIT, stream.read(&mut buf))
            .await
            .expect("third connection resolved");
        assert!(matches!(read, Ok(0) | Err(_)), "third player was served");
    }
}

#[tokio::test]
async fn test_quitting_while_waiting_frees_the_slot() {
    let (addr, lifecycle, _server) = spawn_server(local()).await;
    let mut first = Client::connect(addr).await;
    wait_registered(&lifecycle, 1).await;
    first.send("QUIT").await;
    first.expect_closed().await;
    wait_registered(&lifecycle, 0).await;

    let mut x = Client::connect(addr).await;
    wait_registered(&lifecycle, 1).await;
    let mut o = Client::connect(addr).await;
    x.expect_all(&["START", "SYMBOL X", "BOARD .........", "YOUR_TURN"])
        .await;
    o.expect_all(&["START", "SYMBOL O", "BOARD ........."]).await;
}

#[tokio::test]
async fn test_split_writes_are_reassembled() {
    let mut game = start_game(local()).await;

    game.x.writer.write_all(b"  ").await.expect("send");
    game.x.writer.flush().await.expect("flush");
    tokio::time::sleep(Duration::from_millis(20)).await;
    game.x.writer.write_all(b"5\r\n").await.expect("send");
    game.x.expect("MOVE_OK 5 X").await;
}

#[tokio::test]
async fn test_oversized_line_drops_connection() {
    let mut game = start_game(local().with_max_line_len(16)).await;

    game.x.send(&"9".repeat(64)).await;
    game.x.expect_closed().await;
    game.o.expect("OPPONENT_QUIT").await;
}

#[tokio::test]
async fn test_idle_peer_is_dropped() {
    let mut game = start_game(local().with_idle_timeout_secs(1)).await;

    // X keeps its own connection alive with blank lines; O stays silent.
    let quit = timeout(WAIT, async {
        loop {
            game.x.send("").await;
            match timeout(Duration::from_millis(200), game.x.lines.next_line()).await {
                Ok(Ok(Some(line))) => break line,
                Ok(_) => panic!("connection closed before notification"),
                Err(_) => continue,
            }
        }
    })
    .await
    .expect("idle opponent dropped");
    assert_eq!(quit, "OPPONENT_QUIT");
    game.o.expect_closed().await;
}

#[tokio::test]
async fn test_unrepresentable_idle_timeout_never_fires() {
    let mut game = start_game(local().with_idle_timeout_secs(u64::MAX)).await;

    game.x.send("5").await;
    game.x.expect_all(&["MOVE_OK 5 X", "BOARD ....X...."]).await;
    game.o
        .expect_all(&["UPDATE 5 X", "BOARD ....X....", "YOUR_TURN"])
        .await;
    assert_eq!(game.lifecycle.arbiter().phase(), GamePhase::InProgress);
}

#[tokio::test]
async fn test_waiting_alone_is_not_idle() {
    let (addr, lifecycle, _server) = spawn_server(local().with_idle_timeout_secs(1)).await;
    let mut x = Client::connect(addr).await;
    wait_registered(&lifecycle, 1).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let mut o = Client::connect(addr).await;

    x.expect_all(&["START", "SYMBOL X", "BOARD .........", "YOUR_TURN"])
        .await;
    o.expect_all(&["START", "SYMBOL O", "BOARD ........."]).await;
}
