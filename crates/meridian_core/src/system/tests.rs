use crate::config::HostConfig;
use crate::error::{ComponentMisuse, CoreError};
use crate::host::Host;
use crate::service::{HostContext, Registrar, Service};
use crate::types::{EntityId, Role};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct ScoreChanged {
    score: u32,
}

#[derive(Debug)]
struct Unheard;

fn host() -> Host {
    Host::new(Role::Master, HostConfig::default())
}

#[test]
fn handlers_run_in_registration_order_exactly_once() {
    let mut host = host();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let seen = seen.clone();
        host.on_event(label, move |_ctx: &HostContext<'_>, event: &ScoreChanged| {
            seen.lock().unwrap().push((label, event.score));
            Ok(())
        });
    }

    assert_eq!(host.publish(&ScoreChanged { score: 9 }).unwrap(), 3);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("first", 9), ("second", 9), ("third", 9)]
    );
}

#[test]
fn publishing_without_listeners_is_a_no_op() {
    let host = host();
    assert_eq!(host.publish(&Unheard).unwrap(), 0);
    let stats = host.bus_stats();
    assert_eq!(stats.events_published, 1);
    assert_eq!(stats.handler_invocations, 0);
}

#[test]
fn a_failing_handler_does_not_stop_later_handlers() {
    let mut host = host();
    let reached = Arc::new(Mutex::new(false));
    host.on_event("fails", |_ctx: &HostContext<'_>, _event: &ScoreChanged| {
        Err(CoreError::InvalidData("nope".into()))
    });
    {
        let reached = reached.clone();
        host.on_event("runs", move |_ctx: &HostContext<'_>, _event: &ScoreChanged| {
            *reached.lock().unwrap() = true;
            Ok(())
        });
    }

    assert_eq!(host.publish(&ScoreChanged { score: 1 }).unwrap(), 1);
    assert!(*reached.lock().unwrap());
    assert_eq!(host.bus_stats().handler_failures, 1);
}

#[test]
fn fatal_handler_errors_surface_after_all_handlers_ran() {
    let mut host = host();
    let count = Arc::new(Mutex::new(0));
    host.on_event("fatal", |_ctx: &HostContext<'_>, _event: &ScoreChanged| {
        Err(ComponentMisuse::UnknownEntity(EntityId::new()).into())
    });
    {
        let count = count.clone();
        host.on_event("after", move |_ctx: &HostContext<'_>, _event: &ScoreChanged| {
            *count.lock().unwrap() += 1;
            Ok(())
        });
    }

    let err = host.publish(&ScoreChanged { score: 1 }).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(*count.lock().unwrap(), 1);
}

struct Scoreboard {
    total: Mutex<u32>,
}

impl Scoreboard {
    fn on_score(&self, _ctx: &HostContext<'_>, event: &ScoreChanged) -> crate::Result<()> {
        *self.total.lock().unwrap() += event.score;
        Ok(())
    }
}

impl Service for Scoreboard {
    fn name(&self) -> &str {
        "Scoreboard"
    }

    fn register(registrar: &mut Registrar<'_, Self>) -> crate::Result<()> {
        registrar.on_event(Self::on_score);
        Ok(())
    }
}

#[test]
fn detaching_a_service_removes_its_handlers() {
    let mut host = host();
    let board = host
        .attach(Scoreboard {
            total: Mutex::new(0),
        })
        .unwrap();
    assert_eq!(host.bus_stats().total_handlers, 1);

    host.publish(&ScoreChanged { score: 4 }).unwrap();
    assert_eq!(*board.total.lock().unwrap(), 4);

    assert!(host.detach::<Scoreboard>().unwrap());
    assert_eq!(host.publish(&ScoreChanged { score: 4 }).unwrap(), 0);
    assert_eq!(*board.total.lock().unwrap(), 4);
    assert_eq!(host.bus_stats().total_handlers, 0);
}
