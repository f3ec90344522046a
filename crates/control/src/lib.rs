// crates/control/src/lib.rs

//! Unix-socket control interface.
//!
//! One fixed object with four methods, spoken as line-delimited JSON over a
//! Unix stream socket:
//!
//! ```json
//! {"method":"counts"}
//! {"method":"count","io":"binary-input"}
//! {"method":"get","io":"binary-input","instance":0}
//! {"method":"set","io":"binary-output","instance":0,"state":true}
//! ```
//!
//! `get` and `set` also take a batch form, a `gpios` array of targets that is
//! answered with a per-entry `results` array; a failing entry does not stop
//! the batch:
//!
//! ```json
//! {"method":"get","gpios":[{"io":"binary-input","instance":0}]}
//! {"method":"set","gpios":[{"io":"binary-output","instance":0,"state":true}]}
//! ```
//!
//! Replies carry `"ok":true` plus the payload, or `"ok":false` with an
//! `error` string; a failed request does not end the connection. Connections
//! are served one at a time, in arrival order.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Dispatch target for control requests. Handler-level failures (unknown io
/// type, out-of-range instance, hardware errors) come back as strings and
/// turn into error replies.
pub trait IoHandler {
    /// Instance counts per io type, in reporting order.
    fn counts(&self) -> Vec<(String, usize)>;
    fn get(&self, io: &str, instance: usize) -> Result<bool, String>;
    fn set(&self, io: &str, instance: usize, state: bool) -> Result<(), String>;
}

#[derive(Debug, Deserialize)]
struct GetTarget {
    io: String,
    instance: usize,
}

#[derive(Debug, Deserialize)]
struct SetTarget {
    io: String,
    instance: usize,
    state: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
enum Request {
    Count {
        io: String,
    },
    Counts,
    Get {
        io: Option<String>,
        instance: Option<usize>,
        gpios: Option<Vec<GetTarget>>,
    },
    Set {
        io: Option<String>,
        instance: Option<usize>,
        state: Option<bool>,
        gpios: Option<Vec<SetTarget>>,
    },
}

#[derive(Debug, Serialize)]
struct Response {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    counts: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<EntryReply>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// One element of a batch reply: the target echoed back plus its outcome.
#[derive(Debug, Serialize)]
struct EntryReply {
    io: String,
    instance: usize,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    fn ok() -> Self {
        Self {
            ok: true,
            state: None,
            count: None,
            counts: None,
            results: None,
            error: None,
        }
    }

    fn state(state: bool) -> Self {
        Self {
            state: Some(state),
            ..Self::ok()
        }
    }

    fn count(count: usize) -> Self {
        Self {
            count: Some(count),
            ..Self::ok()
        }
    }

    fn counts(counts: BTreeMap<String, usize>) -> Self {
        Self {
            counts: Some(counts),
            ..Self::ok()
        }
    }

    fn results(results: Vec<EntryReply>) -> Self {
        Self {
            results: Some(results),
            ..Self::ok()
        }
    }

    fn err(message: String) -> Self {
        Self {
            error: Some(message),
            ok: false,
            ..Self::ok()
        }
    }
}

/// Bind the control socket, unlinking a stale socket file first.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale control socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}

/// Accept and serve connections sequentially, forever. Only accept errors
/// propagate; a connection failing mid-stream is logged and the loop moves
/// on.
pub fn serve(listener: &UnixListener, handler: &dyn IoHandler) -> io::Result<()> {
    loop {
        let (stream, _addr) = listener.accept()?;
        if let Err(e) = handle_client(stream, handler) {
            warn!("control connection ended with error: {e}");
        }
    }
}

fn handle_client(stream: UnixStream, handler: &dyn IoHandler) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(request, handler),
            Err(e) => Response::err(format!("bad request: {e}")),
        };
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded)?;
    }
    Ok(())
}

fn dispatch(request: Request, handler: &dyn IoHandler) -> Response {
    match request {
        // Unknown io types count zero instances rather than erroring.
        Request::Count { io } => Response::count(
            handler
                .counts()
                .into_iter()
                .find(|(name, _)| *name == io)
                .map_or(0, |(_, count)| count),
        ),
        Request::Counts => Response::counts(handler.counts().into_iter().collect()),
        Request::Get {
            gpios: Some(targets),
            ..
        } => get_many(targets, handler),
        Request::Get {
            io: Some(io),
            instance: Some(instance),
            gpios: None,
        } => match handler.get(&io, instance) {
            Ok(state) => Response::state(state),
            Err(e) => Response::err(e),
        },
        Request::Get { .. } => Response::err("get needs io and instance, or a gpios array".into()),
        Request::Set {
            gpios: Some(targets),
            ..
        } => set_many(targets, handler),
        Request::Set {
            io: Some(io),
            instance: Some(instance),
            state: Some(state),
            gpios: None,
        } => match handler.set(&io, instance, state) {
            Ok(()) => Response::ok(),
            Err(e) => Response::err(e),
        },
        Request::Set { .. } => {
            Response::err("set needs io, instance and state, or a gpios array".into())
        }
    }
}

fn get_many(targets: Vec<GetTarget>, handler: &dyn IoHandler) -> Response {
    let results = targets
        .into_iter()
        .map(|target| {
            let (ok, state, error) = match handler.get(&target.io, target.instance) {
                Ok(state) => (true, Some(state), None),
                Err(e) => (false, None, Some(e)),
            };
            EntryReply {
                io: target.io,
                instance: target.instance,
                ok,
                state,
                error,
            }
        })
        .collect();
    Response::results(results)
}

fn set_many(targets: Vec<SetTarget>, handler: &dyn IoHandler) -> Response {
    let results = targets
        .into_iter()
        .map(|target| {
            let (ok, error) = match handler.set(&target.io, target.instance, target.state) {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e)),
            };
            EntryReply {
                io: target.io,
                instance: target.instance,
                ok,
                state: None,
                error,
            }
        })
        .collect();
    Response::results(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Shutdown;
    use std::sync::Mutex;

    struct FakeIo {
        inputs: Vec<bool>,
        outputs: Mutex<Vec<bool>>,
    }

    impl IoHandler for FakeIo {
        fn counts(&self) -> Vec<(String, usize)> {
            vec![
                ("binary-input".into(), self.inputs.len()),
                ("binary-output".into(), self.outputs.lock().unwrap().len()),
            ]
        }

        fn get(&self, io: &str, instance: usize) -> Result<bool, String> {
            if io != "binary-input" {
                return Err(format!("cannot read io type {io}"));
            }
            self.inputs
                .get(instance)
                .copied()
                .ok_or_else(|| format!("no input instance {instance}"))
        }

        fn set(&self, io: &str, instance: usize, state: bool) -> Result<(), String> {
            if io != "binary-output" {
                return Err(format!("cannot write io type {io}"));
            }
            let mut outputs = self.outputs.lock().unwrap();
            match outputs.get_mut(instance) {
                Some(slot) => {
                    *slot = state;
                    Ok(())
                }
                None => Err(format!("no output instance {instance}")),
            }
        }
    }

    fn exchange(handler: &FakeIo, requests: &str) -> Vec<serde_json::Value> {
        let (client, server) = UnixStream::pair().unwrap();
        std::thread::scope(|scope| {
            let _server = scope.spawn(move || handle_client(server, handler));
            let mut client = client;
            client.write_all(requests.as_bytes()).unwrap();
            client.shutdown(Shutdown::Write).unwrap();
            BufReader::new(client)
                .lines()
                .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
                .collect()
        })
    }

    fn fake() -> FakeIo {
        FakeIo {
            inputs: vec![true, false],
            outputs: Mutex::new(vec![false]),
        }
    }

    #[test]
    fn counts_reports_both_io_types() {
        let replies = exchange(&fake(), "{\"method\":\"counts\"}\n");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["ok"], true);
        assert_eq!(replies[0]["counts"]["binary-input"], 2);
        assert_eq!(replies[0]["counts"]["binary-output"], 1);
    }

    #[test]
    fn count_reports_one_io_type_and_zero_for_unknown() {
        let replies = exchange(
            &fake(),
            concat!(
                "{\"method\":\"count\",\"io\":\"binary-input\"}\n",
                "{\"method\":\"count\",\"io\":\"analog-input\"}\n",
            ),
        );
        assert_eq!(replies[0]["ok"], true);
        assert_eq!(replies[0]["count"], 2);
        assert_eq!(replies[1]["ok"], true);
        assert_eq!(replies[1]["count"], 0);
    }

    #[test]
    fn get_and_set_dispatch_to_the_handler() {
        let handler = fake();
        let replies = exchange(
            &handler,
            concat!(
                "{\"method\":\"get\",\"io\":\"binary-input\",\"instance\":0}\n",
                "{\"method\":\"set\",\"io\":\"binary-output\",\"instance\":0,\"state\":true}\n",
            ),
        );
        assert_eq!(replies[0]["state"], true);
        assert_eq!(replies[1]["ok"], true);
        assert!(handler.outputs.lock().unwrap()[0]);
    }

    #[test]
    fn batch_get_answers_every_entry() {
        let replies = exchange(
            &fake(),
            concat!(
                "{\"method\":\"get\",\"gpios\":[",
                "{\"io\":\"binary-input\",\"instance\":0},",
                "{\"io\":\"binary-output\",\"instance\":0},",
                "{\"io\":\"binary-input\",\"instance\":9}",
                "]}\n",
            ),
        );
        assert_eq!(replies[0]["ok"], true);
        let results = replies[0]["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["ok"], true);
        assert_eq!(results[0]["state"], true);
        assert_eq!(results[1]["ok"], false);
        assert!(
            results[1]["error"]
                .as_str()
                .unwrap()
                .contains("binary-output")
        );
        // A failed entry does not stop the batch.
        assert_eq!(results[2]["io"], "binary-input");
        assert_eq!(results[2]["instance"], 9);
        assert_eq!(results[2]["ok"], false);
    }

    #[test]
    fn batch_set_applies_each_writable_entry() {
        let handler = fake();
        let replies = exchange(
            &handler,
            concat!(
                "{\"method\":\"set\",\"gpios\":[",
                "{\"io\":\"binary-output\",\"instance\":0,\"state\":true},",
                "{\"io\":\"binary-input\",\"instance\":0,\"state\":true}",
                "]}\n",
            ),
        );
        let results = replies[0]["results"].as_array().unwrap();
        assert_eq!(results[0]["ok"], true);
        assert_eq!(results[1]["ok"], false);
        assert!(handler.outputs.lock().unwrap()[0]);
    }

    #[test]
    fn get_without_a_target_is_an_error() {
        let replies = exchange(&fake(), "{\"method\":\"get\"}\n");
        assert_eq!(replies[0]["ok"], false);
        assert!(replies[0]["error"].as_str().unwrap().contains("gpios"));
    }

    #[test]
    fn handler_failures_become_error_replies() {
        let replies = exchange(
            &fake(),
            "{\"method\":\"get\",\"io\":\"binary-output\",\"instance\":0}\n",
        );
        assert_eq!(replies[0]["ok"], false);
        assert!(
            replies[0]["error"]
                .as_str()
                .unwrap()
                .contains("binary-output")
        );
    }

    #[test]
    fn malformed_request_keeps_the_connection_alive() {
        let replies = exchange(&fake(), "not json\n{\"method\":\"counts\"}\n");
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["ok"], false);
        assert_eq!(replies[1]["ok"], true);
    }

    #[test]
    fn bind_replaces_a_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let first = bind(&path).unwrap();
        drop(first);
        // The old socket file is still on disk; bind must reclaim the path.
        let _second = bind(&path).unwrap();
    }
}
