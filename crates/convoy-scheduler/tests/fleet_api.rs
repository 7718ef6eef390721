//! FleetScheduler against an in-process fake of the fleet v1 API.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use convoy_core::Cluster;
use convoy_scheduler::fleet::template_name;
use convoy_scheduler::{Events, FleetScheduler, Reason, Scheduler, SchedulerError, UnitAction};
use convoy_units::UnitData;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use tokio::net::TcpListener;

#[derive(Default)]
struct FakeFleet {
    units: BTreeMap<String, Value>,
    /// unit -> (active state, sub state)
    states: BTreeMap<String, (String, String)>,
    /// Answer this many requests with 503 before serving.
    unavailable: u32,
    requests: Vec<String>,
}

type Shared = Arc<Mutex<FakeFleet>>;

fn respond(status: u16, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

async fn handle(fake: Shared, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let body = req.into_body().collect().await.unwrap().to_bytes();

    let mut fake = fake.lock().unwrap();
    fake.requests.push(format!("{method} {path}"));
    if fake.unavailable > 0 {
        fake.unavailable -= 1;
        return Ok(respond(503, json!({"error": "unavailable"})));
    }

    let route = path.trim_start_matches("/fleet/v1");
    let response = match (method.as_str(), route) {
        ("GET", "/machines") => respond(200, json!({"machines": [{"id": "m1", "primaryIP": "10.0.0.1"}]})),
        ("GET", "/units") => {
            // Two units per page.
            let start: usize = query_param(&query, "nextPageToken")
                .and_then(|t| t.parse().ok())
                .unwrap_or(0);
            let units: Vec<&Value> = fake.units.values().skip(start).take(2).collect();
            let mut page = json!({ "units": units });
            if start + 2 < fake.units.len() {
                page["nextPageToken"] = json!((start + 2).to_string());
            }
            respond(200, page)
        }
        ("GET", "/state") => {
            let only = query_param(&query, "unitName");
            let states: Vec<Value> = fake
                .states
                .iter()
                .filter(|(name, _)| only.as_deref().is_none_or(|o| o == name.as_str()))
                .map(|(name, (active, sub))| {
                    json!({"name": name, "machineID": "m1", "systemdActiveState": active, "systemdSubState": sub})
                })
                .collect();
            respond(200, json!({ "states": states }))
        }
        (_, route) if route.starts_with("/units/") => {
            let name = route.trim_start_matches("/units/").to_string();
            match method.as_str() {
                "GET" => match fake.units.get(&name) {
                    Some(unit) => respond(200, unit.clone()),
                    None => respond(404, json!({"error": "not found"})),
                },
                "PUT" => {
                    let update: Value = serde_json::from_slice(&body).unwrap();
                    let desired = update["desiredState"].as_str().unwrap_or_default().to_string();
                    if !fake.units.contains_key(&name) {
                        let template = template_name(&name).and_then(|t| fake.units.get(&t));
                        let options = match (update.get("options"), template) {
                            (Some(options), _) => options.clone(),
                            (None, Some(template)) => template["options"].clone(),
                            (None, None) => return Ok(respond(404, json!({"error": "not found"}))),
                        };
                        fake.units.insert(name.clone(), json!({"name": name, "options": options}));
                    }
                    let unit = fake.units.get_mut(&name).unwrap();
                    unit["desiredState"] = json!(desired);
                    unit["currentState"] = json!(desired);
                    let oneshot = unit["options"]
                        .as_array()
                        .is_some_and(|options| options.iter().any(|o| o["name"] == "Type" && o["value"] == "oneshot"));
                    // What systemd settles in once the unit has been started.
                    let state = match desired.as_str() {
                        "launched" if name.ends_with(".timer") => ("active", "waiting"),
                        "launched" if oneshot => ("inactive", "dead"),
                        "launched" => ("active", "running"),
                        _ => ("inactive", "dead"),
                    };
                    fake.states
                        .insert(name, (state.0.to_string(), state.1.to_string()));
                    respond(200, json!({}))
                }
                "DELETE" => {
                    if fake.units.remove(&name).is_some() {
                        fake.states.remove(&name);
                        respond(200, json!({}))
                    } else {
                        respond(404, json!({"error": "not found"}))
                    }
                }
                _ => respond(405, Value::Null),
            }
        }
        _ => respond(404, json!({"error": "no route"})),
    };
    Ok(response)
}

async fn spawn_fleet(fake: Shared) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let fake = fake.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req| handle(fake.clone(), req));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    format!("http://{addr}")
}

async fn scheduler(fake: &Shared) -> FleetScheduler {
    let endpoint = spawn_fleet(fake.clone()).await;
    let cluster: Cluster = toml::from_str(&format!(
        r#"
stack = "test"
endpoint = "{endpoint}"
start_timeout_secs = 2

[retry]
max_attempts = 3
initial_backoff_ms = 1
max_backoff_ms = 2
"#
    ))
    .unwrap();
    FleetScheduler::new(&cluster)
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
}

const WEB: &str = "[Unit]\nDescription=web\n\n[Service]\nExecStart=/usr/bin/docker run nginx\n";

#[tokio::test]
async fn start_creates_and_waits_for_running() {
    let fake = Shared::default();
    let fleet = scheduler(&fake).await;
    let (events, mut rx) = Events::channel();

    fleet.validate_cluster().await.unwrap();
    fleet
        .start(&events, &[UnitData::new("app-web-srv-mn@1.service", WEB)])
        .await
        .unwrap();
    drop(events);

    let mut actions = Vec::new();
    while let Some(event) = rx.recv().await {
        actions.push(event.to_string());
    }
    assert_eq!(
        actions,
        vec![
            "app-web-srv-mn@1.service: creating",
            "app-web-srv-mn@1.service: launching",
            "app-web-srv-mn@1.service: running",
        ]
    );

    assert_eq!(fleet.list().await.unwrap(), vec!["app-web-srv-mn@1.service"]);
    let state = fleet.get_state("app-web-srv-mn@1.service").await.unwrap();
    assert!(!state.failed);
    assert_eq!(state.description, "active/running");
}

#[tokio::test]
async fn change_detection_compares_options() {
    let fake = Shared::default();
    let fleet = scheduler(&fake).await;
    let name = "app-web-srv-mn@1.service";
    fleet
        .start(&Events::discard(), &[UnitData::new(name, WEB)])
        .await
        .unwrap();

    let same = fleet.has_changed(&UnitData::new(name, WEB)).await.unwrap();
    assert!(!same.changed, "unexpected diff: {:?}", same.diff);

    let edited = WEB.replace("nginx", "nginx:1.25");
    let changes = fleet.has_changed(&UnitData::new(name, edited)).await.unwrap();
    assert!(changes.changed);
    assert_eq!(
        changes.diff,
        vec![
            "-ExecStart=/usr/bin/docker run nginx",
            "+ExecStart=/usr/bin/docker run nginx:1.25"
        ]
    );

    let missing = fleet
        .has_changed(&UnitData::new("other.service", WEB))
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn destroy_tolerates_absent_units() {
    let fake = Shared::default();
    let fleet = scheduler(&fake).await;
    fleet
        .start(&Events::discard(), &[UnitData::new("a.service", WEB)])
        .await
        .unwrap();

    let units = vec!["a.service".to_string(), "ghost.service".to_string()];
    fleet.destroy(&Events::discard(), Reason::Obsolete, &units).await.unwrap();
    fleet.destroy(&Events::discard(), Reason::Obsolete, &units).await.unwrap();

    assert!(fleet.list().await.unwrap().is_empty());
    assert!(fleet.get_state("a.service").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn listing_follows_pages() {
    let fake = Shared::default();
    let fleet = scheduler(&fake).await;
    let units: Vec<UnitData> = (1..=5)
        .map(|i| UnitData::new(format!("app-web-srv-mn@{i}.service"), WEB))
        .collect();
    fleet.start(&Events::discard(), &units).await.unwrap();

    let listed = fleet.list().await.unwrap();
    assert_eq!(listed.len(), 5);
    let pages = fake
        .lock()
        .unwrap()
        .requests
        .iter()
        .filter(|r| *r == "GET /fleet/v1/units")
        .count();
    assert_eq!(pages, 3);
}

#[tokio::test]
async fn stop_counts_global_units_without_waiting() {
    let fake = Shared::default();
    let fleet = scheduler(&fake).await;
    let global = format!("{WEB}\n[X-Fleet]\nGlobal=true\n");
    fleet
        .start(
            &Events::discard(),
            &[UnitData::new("a.service", WEB), UnitData::new("g.service", global)],
        )
        .await
        .unwrap();

    let (events, mut rx) = Events::channel();
    let units = vec!["a.service".to_string(), "g.service".to_string(), "absent.service".to_string()];
    let stats = fleet.stop(&events, Reason::Modified, &units).await.unwrap();
    drop(events);
    assert_eq!(stats.stopped_units, 1);
    assert_eq!(stats.stopped_global_units, 1);

    let mut stopped = Vec::new();
    while let Some(event) = rx.recv().await {
        if let convoy_scheduler::Event::Unit { unit, action: UnitAction::Stopped } = event {
            stopped.push(unit);
        }
    }
    assert_eq!(stopped, vec!["a.service"]);
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let fake = Shared::default();
    let fleet = scheduler(&fake).await;
    fake.lock().unwrap().unavailable = 2;

    fleet.validate_cluster().await.unwrap();
    assert_eq!(fake.lock().unwrap().requests.len(), 3);

    fake.lock().unwrap().unavailable = 5;
    let err = fleet.list().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Transient(_)));
}

const CRON: &str = "[Unit]\nDescription=cron\n\n[Service]\nType=oneshot\nRemainAfterExit=no\nExecStart=/usr/bin/docker run backup\n";
const CRON_TIMER: &str = "[Unit]\nDescription=cron timer\n\n[Timer]\nOnCalendar=hourly\nUnit=app-web-cron-mn@1.service\n";

#[tokio::test]
async fn timers_and_oneshots_start_without_running() {
    let fake = Shared::default();
    let fleet = scheduler(&fake).await;
    let units = [
        UnitData::new("app-web-cron-mn@1.service", CRON),
        UnitData::new("app-web-cron-tm@1.timer", CRON_TIMER),
    ];

    let started = tokio::time::timeout(Duration::from_secs(1), fleet.start(&Events::discard(), &units))
        .await
        .expect("start waited for a unit that never runs");
    started.unwrap();

    let timer = fleet.get_state("app-web-cron-tm@1.timer").await.unwrap();
    assert_eq!(timer.description, "active/waiting");
    let oneshot = fleet.get_state("app-web-cron-mn@1.service").await.unwrap();
    assert_eq!(oneshot.description, "inactive/dead");
    assert!(!oneshot.failed);
}

#[tokio::test]
async fn instances_of_a_loaded_template_are_launched_by_name() {
    let fake = Shared::default();
    let fleet = scheduler(&fake).await;
    let template_options = json!([
        {"section": "Unit", "name": "Description", "value": "from template"},
        {"section": "Service", "name": "ExecStart", "value": "/usr/bin/docker run nginx"},
    ]);
    fake.lock().unwrap().units.insert(
        "app-web-srv-mn@.service".to_string(),
        json!({"name": "app-web-srv-mn@.service", "options": template_options, "desiredState": "inactive"}),
    );

    fleet
        .start(&Events::discard(), &[UnitData::new("app-web-srv-mn@2.service", WEB)])
        .await
        .unwrap();

    let fake = fake.lock().unwrap();
    let instance = &fake.units["app-web-srv-mn@2.service"];
    assert_eq!(instance["options"], template_options);
    assert_eq!(instance["currentState"], "launched");
    assert_eq!(fake.states["app-web-srv-mn@2.service"].1, "running");
}
