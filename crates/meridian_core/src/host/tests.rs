use super::*;
use crate::connection::{
    drive_connection, memory_pair, ControlMessage, FrameSink, FrameSource, LinkCommand,
};
use crate::error::ComponentMisuse;
use crate::message::RpcTarget;
use crate::service::Rpc;
use crate::types::EntityId;
use std::sync::Mutex;
use tokio::task::JoinHandle;

const PING: RpcTarget = RpcTarget::new("Echo", "Ping");
const EXPLODE: RpcTarget = RpcTarget::new("Echo", "Explode");
const GARBAGE: RpcTarget = RpcTarget::new("Echo", "Garbage");

/// Answers `Ping` with `Pong` and records every `Pong` it receives.
#[derive(Default)]
struct Echo {
    pongs: Mutex<Vec<(PeerId, u64)>>,
    pings: Mutex<Vec<PeerId>>,
}

impl Echo {
    fn ping(&self, rpc: &Rpc<'_>) -> Result<()> {
        self.pings.lock().unwrap().push(rpc.sender_id());
        let nonce: u64 = rpc.message().arg(0)?;
        rpc.reply("Pong", crate::args![nonce])
    }

    fn pong(&self, rpc: &Rpc<'_>) -> Result<()> {
        let nonce: u64 = rpc.message().arg(0)?;
        self.pongs.lock().unwrap().push((rpc.sender_id(), nonce));
        Ok(())
    }

    fn explode(&self, _rpc: &Rpc<'_>) -> Result<()> {
        Err(ComponentMisuse::UnknownEntity(EntityId::new()).into())
    }

    fn garbage(&self, rpc: &Rpc<'_>) -> Result<()> {
        rpc.message().arg::<u64>(0).map(|_| ())
    }
}

impl Service for Echo {
    fn name(&self) -> &str {
        "Echo"
    }

    fn register(registrar: &mut Registrar<'_, Self>) -> Result<()> {
        registrar.rpc("Ping", Self::ping)?;
        registrar.rpc("Pong", Self::pong)?;
        registrar.rpc("Explode", Self::explode)?;
        registrar.rpc("Garbage", Self::garbage)?;
        Ok(())
    }
}

/// Records lifecycle hooks into a shared log.
struct Recorder<const ID: u8> {
    log: Arc<Mutex<Vec<String>>>,
}

impl<const ID: u8> Recorder<ID> {
    fn record(&self, hook: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:{}", ID, hook));
        Ok(())
    }
}

impl<const ID: u8> Service for Recorder<ID> {
    fn name(&self) -> &str {
        if ID == 1 {
            "RecorderOne"
        } else {
            "RecorderTwo"
        }
    }

    fn on_enable(&self, _ctx: &HostContext<'_>) -> Result<()> {
        self.record("enable")
    }

    fn on_start(&self, _ctx: &HostContext<'_>) -> Result<()> {
        self.record("start")
    }

    fn on_disable(&self, _ctx: &HostContext<'_>) -> Result<()> {
        self.record("disable")
    }

    fn on_began_connected(&self, _ctx: &HostContext<'_>, _link: &ConnectionHandle) -> Result<()> {
        self.record("began")
    }

    fn on_connected(&self, _ctx: &HostContext<'_>, _link: &ConnectionHandle) -> Result<()> {
        self.record("connected")
    }

    fn on_disconnected(&self, _ctx: &HostContext<'_>, _peer: PeerId, _reason: CloseReason) -> Result<()> {
        self.record("disconnected")
    }

    fn on_finished_disconnected(
        &self,
        _ctx: &HostContext<'_>,
        _peer: PeerId,
        _reason: CloseReason,
    ) -> Result<()> {
        self.record("finished")
    }
}

fn master() -> Host {
    Host::new(Role::Master, HostConfig::default())
}

fn slave() -> Host {
    Host::new(Role::Slave, HostConfig::default())
}

/// Joins two hosts with an in-memory transport.
fn link(server: &Host, client: &Host) -> (JoinHandle<CloseReason>, JoinHandle<CloseReason>) {
    let ((server_sink, server_source), (client_sink, client_source)) = memory_pair();
    let server_task = tokio::spawn(drive_connection(
        server_sink,
        server_source,
        server.acceptor_options(),
        server.sender(),
    ));
    let client_task = tokio::spawn(drive_connection(
        client_sink,
        client_source,
        client.initiator_options(),
        client.sender(),
    ));
    (server_task, client_task)
}

/// Ticks every running host until `done` holds.
async fn settle(hosts: &mut [&mut Host], done: impl Fn(&[&mut Host]) -> bool) {
    for _ in 0..200 {
        for host in hosts.iter_mut() {
            if host.is_running() {
                host.tick(Duration::from_millis(1)).unwrap();
            }
        }
        if done(hosts) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("hosts did not settle");
}

#[tokio::test]
async fn handshake_gives_each_side_one_role() {
    let mut server = master();
    let mut client = slave();
    server.start().unwrap();
    client.start().unwrap();
    link(&server, &client);

    settle(&mut [&mut server, &mut client], |h| {
        h[0].link_count() == 1 && h[1].link_count() == 1
    })
    .await;

    let server_side = server.link(client.id()).unwrap();
    let client_side = client.link(server.id()).unwrap();
    assert_eq!(server_side.local_role(), Role::Master);
    assert_eq!(client_side.local_role(), Role::Slave);
    assert_eq!(client_side.remote_role(), Role::Master);
}

#[tokio::test]
async fn ping_round_trip_reports_server_as_sender() {
    let mut server = master();
    let mut client = slave();
    let server_echo = server.attach(Echo::default()).unwrap();
    let client_echo = client.attach(Echo::default()).unwrap();
    server.start().unwrap();
    client.start().unwrap();
    link(&server, &client);
    settle(&mut [&mut server, &mut client], |h| {
        h[0].link_count() == 1 && h[1].link_count() == 1
    })
    .await;

    client
        .context()
        .call_peer(server.id(), &PING, crate::args![41])
        .unwrap();
    settle(&mut [&mut server, &mut client], |_| {
        !client_echo.pongs.lock().unwrap().is_empty()
    })
    .await;

    assert_eq!(*server_echo.pings.lock().unwrap(), vec![client.id()]);
    assert_eq!(*client_echo.pongs.lock().unwrap(), vec![(server.id(), 41)]);
}

#[tokio::test]
async fn hurl_delivers_to_self_through_loopback() {
    let mut host = master();
    let echo = host.attach(Echo::default()).unwrap();
    host.start().unwrap();

    host.context().hurl(&PING, crate::args![7]).unwrap();
    let report = host.tick(Duration::ZERO).unwrap();

    // Ping and the Pong it replies with are both handled in the same drain.
    assert_eq!(report.messages_handled, 2);
    assert_eq!(*echo.pings.lock().unwrap(), vec![host.id()]);
    assert_eq!(*echo.pongs.lock().unwrap(), vec![(host.id(), 7)]);
}

#[tokio::test]
async fn unknown_targets_and_bad_arguments_are_dropped() {
    let mut host = master();
    host.attach(Echo::default()).unwrap();
    host.start().unwrap();

    host.context()
        .hurl(&RpcTarget::new("Nobody", "Home"), crate::args![])
        .unwrap();
    host.context().hurl(&GARBAGE, crate::args!["x"]).unwrap();
    host.sender()
        .deliver_frame(LinkId::LOOPBACK, host.id(), "not a frame".to_string())
        .unwrap();

    let report = host.tick(Duration::ZERO).unwrap();
    assert_eq!(report.messages_dropped, 3);
    assert!(host.is_running());
}

#[tokio::test]
async fn fatal_handler_errors_abort_the_tick() {
    let mut host = master();
    host.attach(Echo::default()).unwrap();
    host.start().unwrap();

    host.context().hurl(&EXPLODE, crate::args![]).unwrap();
    let err = host.tick(Duration::ZERO).unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn hooks_run_in_two_phases_across_services() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut server = master();
    let mut client = slave();
    server.attach(Recorder::<1> { log: log.clone() }).unwrap();
    server.attach(Recorder::<2> { log: log.clone() }).unwrap();
    server.start().unwrap();
    client.start().unwrap();
    link(&server, &client);
    settle(&mut [&mut server, &mut client], |h| {
        h[0].link_count() == 1 && h[1].link_count() == 1
    })
    .await;

    client.stop().unwrap();
    settle(&mut [&mut server], |h| h[0].link_count() == 0).await;
    server.stop().unwrap();
    server.stop().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "1:enable", "2:enable", "1:start", "2:start", "1:began", "2:began", "1:connected",
            "2:connected", "1:disconnected", "2:disconnected", "1:finished", "2:finished",
            "1:disable", "2:disable",
        ]
    );
}

#[tokio::test]
async fn client_loss_is_local_but_server_loss_stops_clients() {
    let mut server = master();
    let mut first = slave();
    let mut second = slave();
    for host in [&mut server, &mut first, &mut second] {
        host.start().unwrap();
    }
    link(&server, &first);
    link(&server, &second);
    settle(&mut [&mut server, &mut first, &mut second], |h| {
        h[0].link_count() == 2 && h[1].link_count() == 1 && h[2].link_count() == 1
    })
    .await;

    first.stop().unwrap();
    settle(&mut [&mut server, &mut second], |h| h[0].link_count() == 1).await;
    assert!(server.is_running());
    assert!(second.is_running());
    assert!(server.link(second.id()).is_some());

    server.stop().unwrap();
    settle(&mut [&mut second], |h| !h[0].is_running()).await;
    assert_eq!(second.state(), HostState::Stopped);
    assert_eq!(second.link_count(), 0);
}

#[tokio::test]
async fn duplicate_peer_id_leaves_the_original_link_alone() {
    let mut server = master();
    let mut first = slave();
    let mut impostor = Host::with_id(first.id(), Role::Slave, HostConfig::default());
    for host in [&mut server, &mut first, &mut impostor] {
        host.start().unwrap();
    }
    link(&server, &first);
    settle(&mut [&mut server, &mut first], |h| {
        h[0].link_count() == 1 && h[1].link_count() == 1
    })
    .await;
    let original = server.link(first.id()).unwrap().link_id();

    let (rejected, _) = link(&server, &impostor);
    settle(&mut [&mut server, &mut first, &mut impostor], |_| rejected.is_finished()).await;
    settle(&mut [&mut server, &mut first, &mut impostor], |h| !h[2].is_running()).await;

    assert_eq!(server.link_count(), 1);
    assert_eq!(server.link(first.id()).map(|l| l.link_id()), Some(original));
    assert!(first.is_running());
    assert_eq!(first.link_count(), 1);
}

#[tokio::test]
async fn frames_and_closes_from_another_link_are_ignored() {
    let mut host = master();
    let echo = host.attach(Echo::default()).unwrap();
    host.start().unwrap();

    let peer = PeerId::new();
    let (original, _original_rx) = ConnectionHandle::detached(peer, Role::Master);
    let (impostor, mut impostor_rx) = ConnectionHandle::detached(peer, Role::Master);
    host.sender().link_opened(original.clone()).unwrap();
    host.sender().link_opened(impostor.clone()).unwrap();
    host.tick(Duration::ZERO).unwrap();

    assert_eq!(host.link(peer).map(|l| l.link_id()), Some(original.link_id()));
    assert!(matches!(impostor_rx.try_recv(), Ok(LinkCommand::Close)));

    let ping = codec::encode("Echo", "Ping", 0, &["5"]).unwrap();
    let sender = host.sender();
    sender.deliver_frame(impostor.link_id(), peer, ping.clone()).unwrap();
    sender.deliver_frame(impostor.link_id(), host.id(), ping.clone()).unwrap();
    sender.deliver_frame(original.link_id(), peer, ping).unwrap();
    let report = host.tick(Duration::ZERO).unwrap();
    assert_eq!(report.messages_handled, 1);
    assert_eq!(report.messages_dropped, 2);
    assert_eq!(*echo.pings.lock().unwrap(), vec![peer]);

    sender
        .link_closed(impostor.link_id(), peer, CloseReason::TransportLost)
        .unwrap();
    let report = host.tick(Duration::ZERO).unwrap();
    assert_eq!(report.links_closed, 0);
    assert_eq!(host.link_count(), 1);

    sender
        .link_closed(original.link_id(), peer, CloseReason::ClosedByPeer)
        .unwrap();
    let report = host.tick(Duration::ZERO).unwrap();
    assert_eq!(report.links_closed, 1);
    assert_eq!(host.link_count(), 0);
}

#[tokio::test]
async fn peer_claiming_the_host_id_is_refused() {
    let mut server = master();
    let echo = server.attach(Echo::default()).unwrap();
    server.start().unwrap();

    let ((sink, source), (mut peer_sink, _peer_source)) = memory_pair();
    let driver = tokio::spawn(drive_connection(
        sink,
        source,
        server.acceptor_options(),
        server.sender(),
    ));
    let syn = ControlMessage::Syn {
        initiator: server.id(),
        role: Role::Slave,
    };
    peer_sink.send_frame(syn.encode().unwrap()).await.unwrap();

    assert_eq!(driver.await.unwrap(), CloseReason::HandshakeFailed);
    server.tick(Duration::ZERO).unwrap();
    assert_eq!(server.link_count(), 0);
    assert!(echo.pings.lock().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_services_are_rejected() {
    let mut host = master();
    host.attach(Echo::default()).unwrap();
    assert!(matches!(
        host.attach(Echo::default()),
        Err(CoreError::ServiceConfiguration(_))
    ));
}

#[tokio::test]
async fn stopped_hosts_refuse_to_tick() {
    let mut host = master();
    host.start().unwrap();
    host.stop().unwrap();
    assert!(matches!(host.tick(Duration::ZERO), Err(CoreError::NotRunning)));
}

#[tokio::test]
async fn silent_peer_times_out_the_handshake() {
    let host = Host::new(
        Role::Slave,
        HostConfig {
            handshake_timeout_ms: 50,
            ..HostConfig::default()
        },
    );
    let ((sink, source), _silent_peer) = memory_pair();
    let reason = drive_connection(sink, source, host.initiator_options(), host.sender()).await;
    assert_eq!(reason, CloseReason::HandshakeTimeout);
}

#[tokio::test]
async fn garbage_during_handshake_fails_it() {
    let host = master();
    let ((sink, source), (mut peer_sink, mut peer_source)) = memory_pair();
    let driver = tokio::spawn(drive_connection(
        sink,
        source,
        host.acceptor_options(),
        host.sender(),
    ));

    peer_sink.send_frame("hello?".to_string()).await.unwrap();
    assert_eq!(driver.await.unwrap(), CloseReason::HandshakeFailed);
    assert!(peer_source.next_frame().await.is_none());
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let mut host = master();
    let shutdown = ShutdownState::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.initiate_shutdown();
    });

    host.run(&shutdown).await.unwrap();
    assert_eq!(host.state(), HostState::Stopped);
    assert!(host.tick_count() > 0);
}
