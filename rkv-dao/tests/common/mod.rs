#![allow(dead_code)]

//! In-process RESP store for integration tests.
//!
//! Each accepted connection gets its own thread and its own selected index;
//! all connections share one keyspace per index. Every command received is
//! appended to a log so tests can count round trips.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rkv_dao::RedisDao;
use serde_json::{json, Map, Value as Json};
use tracing_subscriber::EnvFilter;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const DEFAULT_SCAN_COUNT: usize = 10;

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(BTreeMap<String, String>),
}

#[derive(Default)]
struct State {
    dbs: HashMap<u32, BTreeMap<String, Entry>>,
    log: Vec<Vec<String>>,
}

enum Out {
    Simple(&'static str),
    Error(String),
    Int(i64),
    Bulk(Option<String>),
    Array(Vec<Out>),
}

pub struct FakeStore {
    pub host: String,
    pub port: u16,
    state: Arc<Mutex<State>>,
}

impl FakeStore {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let state = Arc::new(Mutex::new(State::default()));

        let shared = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = shared.clone();
                thread::spawn(move || serve(stream, state));
            }
        });

        FakeStore {
            host: addr.ip().to_string(),
            port: addr.port(),
            state,
        }
    }

    /// Every command received so far, upper-cased name first.
    pub fn log(&self) -> Vec<Vec<String>> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Number of logged commands named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|cmd| cmd.first().map(String::as_str) == Some(name))
            .count()
    }

    /// Logged commands other than the pool's borrow-time `PING`.
    pub fn data_commands(&self) -> Vec<Vec<String>> {
        self.log()
            .into_iter()
            .filter(|cmd| cmd[0] != "PING" && cmd[0] != "SELECT")
            .collect()
    }

    /// Seeds a plain string key directly.
    pub fn put(&self, index: u32, key: &str, value: &str) {
        self.state
            .lock()
            .dbs
            .entry(index)
            .or_default()
            .insert(key.to_string(), Entry::Str(value.to_string()));
    }

    /// Keys stored under `index`, sorted.
    pub fn keys(&self, index: u32) -> Vec<String> {
        self.state
            .lock()
            .dbs
            .get(&index)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Adapter configured against `store` with short socket timeouts.
pub fn dao_for(store: &FakeStore) -> RedisDao {
    dao_with(store, json!({}))
}

pub fn dao_with(store: &FakeStore, extra: Json) -> RedisDao {
    dao_on(store, "0", extra)
}

/// Adapter whose unmapped database names resolve to `database`.
pub fn dao_on(store: &FakeStore, database: &str, extra: Json) -> RedisDao {
    let mut options = Map::new();
    options.insert("read_timeout_ms".into(), json!(2000));
    options.insert("write_timeout_ms".into(), json!(2000));
    if let Json::Object(extra) = extra {
        options.extend(extra);
    }
    let dao = RedisDao::new();
    dao.configure("test", "redis", &store.host, store.port, "", "", database, &options)
        .expect("configure");
    dao
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn serve(stream: TcpStream, state: Arc<Mutex<State>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(30)));
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(_) => return,
    };
    let mut reader = BufReader::new(stream);
    let mut selected = 0u32;
    while let Ok(args) = read_command(&mut reader) {
        let out = {
            let mut state = state.lock();
            state.log.push(args.clone());
            execute(&mut state, &mut selected, &args)
        };
        let mut buf = Vec::new();
        encode(&out, &mut buf);
        if writer.write_all(&buf).and_then(|_| writer.flush()).is_err() {
            return;
        }
    }
}

fn execute(state: &mut State, selected: &mut u32, args: &[String]) -> Out {
    let name = args[0].as_str();
    let db = state.dbs.entry(*selected).or_default();
    match name {
        "PING" => Out::Simple("PONG"),
        "AUTH" => Out::Simple("OK"),
        "SELECT" => match args.get(1).and_then(|n| n.parse().ok()) {
            Some(index) => {
                *selected = index;
                Out::Simple("OK")
            }
            None => Out::Error("ERR invalid DB index".into()),
        },
        "GET" => match db.get(&args[1]) {
            Some(Entry::Str(value)) => Out::Bulk(Some(value.clone())),
            Some(Entry::Hash(_)) => Out::Error(WRONGTYPE.into()),
            None => Out::Bulk(None),
        },
        "SET" => {
            db.insert(args[1].clone(), Entry::Str(args[2].clone()));
            Out::Simple("OK")
        }
        "SETNX" => {
            if db.contains_key(&args[1]) {
                Out::Int(0)
            } else {
                db.insert(args[1].clone(), Entry::Str(args[2].clone()));
                Out::Int(1)
            }
        }
        "DEL" => Out::Int(args[1..].iter().filter(|key| db.remove(*key).is_some()).count() as i64),
        "EXISTS" => Out::Int(args[1..].iter().filter(|key| db.contains_key(*key)).count() as i64),
        "KEYS" => Out::Array(
            db.keys()
                .filter(|key| glob_match(&args[1], key))
                .map(|key| Out::Bulk(Some(key.clone())))
                .collect(),
        ),
        "HMSET" => {
            let hash = match hash_mut(db, &args[1]) {
                Ok(hash) => hash,
                Err(out) => return out,
            };
            for pair in args[2..].chunks(2) {
                if let [field, value] = pair {
                    hash.insert(field.clone(), value.clone());
                }
            }
            Out::Simple("OK")
        }
        "HSET" | "HSETNX" => {
            let hash = match hash_mut(db, &args[1]) {
                Ok(hash) => hash,
                Err(out) => return out,
            };
            let fresh = !hash.contains_key(&args[2]);
            if fresh || name == "HSET" {
                hash.insert(args[2].clone(), args[3].clone());
            }
            Out::Int(fresh as i64)
        }
        _ => execute_read(db, name, args),
    }
}

fn execute_read(db: &mut BTreeMap<String, Entry>, name: &str, args: &[String]) -> Out {
    match name {
        "HGET" => match hash_ref(db, &args[1]) {
            Ok(hash) => Out::Bulk(hash.and_then(|h| h.get(&args[2]).cloned())),
            Err(out) => out,
        },
        "HEXISTS" => match hash_ref(db, &args[1]) {
            Ok(hash) => Out::Int(hash.map_or(false, |h| h.contains_key(&args[2])) as i64),
            Err(out) => out,
        },
        "HKEYS" => match hash_ref(db, &args[1]) {
            Ok(hash) => Out::Array(
                hash.into_iter()
                    .flat_map(|h| h.keys())
                    .map(|field| Out::Bulk(Some(field.clone())))
                    .collect(),
            ),
            Err(out) => out,
        },
        "HGETALL" => match hash_ref(db, &args[1]) {
            Ok(hash) => Out::Array(
                hash.into_iter()
                    .flat_map(|h| h.iter())
                    .flat_map(|(f, v)| [Out::Bulk(Some(f.clone())), Out::Bulk(Some(v.clone()))])
                    .collect(),
            ),
            Err(out) => out,
        },
        "HDEL" => {
            let removed = match db.get_mut(&args[1]) {
                Some(Entry::Hash(hash)) => {
                    let removed = args[2..].iter().filter(|f| hash.remove(*f).is_some()).count();
                    if hash.is_empty() {
                        db.remove(&args[1]);
                    }
                    removed
                }
                Some(Entry::Str(_)) => return Out::Error(WRONGTYPE.into()),
                None => 0,
            };
            Out::Int(removed as i64)
        }
        "SCAN" => {
            let keys: Vec<String> = db.keys().cloned().collect();
            scan_page(&keys, &args[1..], |key| vec![key.clone()], |key| key)
        }
        "HSCAN" => match hash_ref(db, &args[1]) {
            Ok(hash) => {
                let fields: Vec<(String, String)> = hash
                    .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
                    .unwrap_or_default();
                scan_page(&fields, &args[2..], |(f, v)| vec![f.clone(), v.clone()], |(f, _)| f)
            }
            Err(out) => out,
        },
        "EVAL" => {
            let numkeys: usize = args.get(2).and_then(|n| n.parse().ok()).unwrap_or(0);
            if args[1] == "return nil" {
                return Out::Bulk(None);
            }
            if args[1] == "return #KEYS" {
                return Out::Int(numkeys as i64);
            }
            Out::Bulk(Some(args[3..3 + numkeys].join(",")))
        }
        other => Out::Error(format!("ERR unknown command '{}'", other)),
    }
}

/// Offset cursors over a sorted snapshot; MATCH filters after paging.
fn scan_page<T>(
    items: &[T],
    args: &[String],
    emit: impl Fn(&T) -> Vec<String>,
    name: impl Fn(&T) -> &String,
) -> Out {
    let start: usize = args[0].parse().unwrap_or(0);
    let mut count = DEFAULT_SCAN_COUNT;
    let mut pattern = "*".to_string();
    for pair in args[1..].chunks(2) {
        match pair {
            [opt, value] if opt.eq_ignore_ascii_case("COUNT") => {
                count = value.parse().unwrap_or(count)
            }
            [opt, value] if opt.eq_ignore_ascii_case("MATCH") => pattern = value.clone(),
            _ => {}
        }
    }
    let end = (start + count.max(1)).min(items.len());
    let page: Vec<Out> = items
        .get(start..end)
        .unwrap_or(&[])
        .iter()
        .filter(|item| glob_match(&pattern, name(*item)))
        .flat_map(|item| emit(item))
        .map(|text| Out::Bulk(Some(text)))
        .collect();
    let next = if end >= items.len() { 0 } else { end };
    Out::Array(vec![Out::Bulk(Some(next.to_string())), Out::Array(page)])
}

fn hash_mut<'a>(
    db: &'a mut BTreeMap<String, Entry>,
    key: &str,
) -> Result<&'a mut BTreeMap<String, String>, Out> {
    match db
        .entry(key.to_string())
        .or_insert_with(|| Entry::Hash(BTreeMap::new()))
    {
        Entry::Hash(hash) => Ok(hash),
        Entry::Str(_) => Err(Out::Error(WRONGTYPE.into())),
    }
}

fn hash_ref<'a>(
    db: &'a BTreeMap<String, Entry>,
    key: &str,
) -> Result<Option<&'a BTreeMap<String, String>>, Out> {
    match db.get(key) {
        Some(Entry::Hash(hash)) => Ok(Some(hash)),
        Some(Entry::Str(_)) => Err(Out::Error(WRONGTYPE.into())),
        None => Ok(None),
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    fn go(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => go(&p[1..], t) || (!t.is_empty() && go(p, &t[1..])),
            (Some(b'?'), Some(_)) => go(&p[1..], &t[1..]),
            (Some(a), Some(b)) if a == b => go(&p[1..], &t[1..]),
            _ => false,
        }
    }
    go(pattern.as_bytes(), text.as_bytes())
}

fn encode(out: &Out, buf: &mut Vec<u8>) {
    match out {
        Out::Simple(msg) => buf.extend_from_slice(format!("+{}\r\n", msg).as_bytes()),
        Out::Error(msg) => buf.extend_from_slice(format!("-{}\r\n", msg).as_bytes()),
        Out::Int(n) => buf.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
        Out::Bulk(None) => buf.extend_from_slice(b"$-1\r\n"),
        Out::Bulk(Some(data)) => {
            buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
            buf.extend_from_slice(data.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Out::Array(items) => {
            buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode(item, buf);
            }
        }
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<String>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for idx in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        let arg = String::from_utf8_lossy(&data).into_owned();
        args.push(if idx == 0 { arg.to_ascii_uppercase() } else { arg });
    }
    if args.is_empty() {
        return Err(invalid("empty command"));
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("bad length"))
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}
