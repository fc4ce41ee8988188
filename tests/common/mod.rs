//! Scripted IPROTO server for integration tests.
//!
//! Every accepted connection gets a greeting, then each request frame is
//! parsed into an [`Incoming`], logged, and handed to the script. The
//! script answers with a list of [`Action`]s.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use iproto_client::codec::MsgPackCodec;
use iproto_client::protocol::{build_frame, codes, keys, FrameBuffer, Greeting};
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const SALT: [u8; 20] = [7u8; 20];
pub const VERSION: &str = "Tarantool 2.11.0 (Binary) 0d4ea8a2-3c4b-4b1a-9c6a-2a6bb1e1c1a3";

/// A parsed request.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub code: u32,
    pub sync: u64,
    /// Raw MsgPack of each body entry.
    pub fields: HashMap<u8, Vec<u8>>,
}

impl Incoming {
    pub fn field<T: DeserializeOwned>(&self, key: u8) -> Option<T> {
        self.fields
            .get(&key)
            .map(|raw| MsgPackCodec::decode(raw).unwrap())
    }

    pub fn raw(&self, key: u8) -> Option<&[u8]> {
        self.fields.get(&key).map(Vec::as_slice)
    }

    pub fn space_id(&self) -> Option<u32> {
        self.field(keys::SPACE_ID)
    }

    pub fn index_id(&self) -> Option<u32> {
        self.field(keys::INDEX_ID)
    }
}

/// What the server does in reply to a request.
pub enum Action {
    Send(Vec<u8>),
    /// Pause before the next action of this connection.
    Delay(Duration),
    Hangup,
}

type Script = Box<dyn FnMut(&Incoming) -> Vec<Action> + Send>;

pub struct MockServer {
    pub port: u16,
    accepted: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<Incoming>>>,
}

impl MockServer {
    pub async fn start<F>(script: F) -> Self
    where
        F: FnMut(&Incoming) -> Vec<Action> + Send + 'static,
    {
        Self::start_with_greeting(Greeting::encode(VERSION, &SALT).to_vec(), script).await
    }

    pub async fn start_with_greeting<F>(greeting: Vec<u8>, script: F) -> Self
    where
        F: FnMut(&Incoming) -> Vec<Action> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        let script: Arc<Mutex<Script>> = Arc::new(Mutex::new(Box::new(script)));

        let counter = Arc::clone(&accepted);
        let requests = Arc::clone(&log);
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    stream,
                    greeting.clone(),
                    Arc::clone(&script),
                    Arc::clone(&requests),
                ));
            }
        });

        Self {
            port,
            accepted,
            log,
        }
    }

    /// Number of accepted TCP connections.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Incoming> {
        self.log.lock().clone()
    }

    /// Requests addressed to one space.
    pub fn requests_to(&self, space_id: u32) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|req| req.space_id() == Some(space_id))
            .count()
    }
}

async fn serve(
    mut stream: TcpStream,
    greeting: Vec<u8>,
    script: Arc<Mutex<Script>>,
    log: Arc<Mutex<Vec<Incoming>>>,
) {
    if stream.write_all(&greeting).await.is_err() {
        return;
    }

    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };

        for frame in frames.push(&buf[..n]).unwrap() {
            let request = parse_request(frame.payload());
            log.lock().push(request.clone());

            let actions = {
                let mut script = script.lock();
                (&mut *script)(&request)
            };
            for action in actions {
                match action {
                    Action::Send(bytes) => {
                        if stream.write_all(&bytes).await.is_err() {
                            return;
                        }
                    }
                    Action::Delay(pause) => tokio::time::sleep(pause).await,
                    Action::Hangup => return,
                }
            }
        }
    }
}

fn parse_request(payload: &[u8]) -> Incoming {
    let mut cursor = Cursor::new(payload);

    let header: HashMap<u8, u64> = {
        let mut de = rmp_serde::Deserializer::new(&mut cursor);
        HashMap::deserialize(&mut de).unwrap()
    };

    let mut fields = HashMap::new();
    if (cursor.position() as usize) < payload.len() {
        let entries = rmp::decode::read_map_len(&mut cursor).unwrap();
        for _ in 0..entries {
            let key: u8 = rmp::decode::read_int(&mut cursor).unwrap();
            let start = cursor.position() as usize;
            {
                let mut de = rmp_serde::Deserializer::new(&mut cursor);
                IgnoredAny::deserialize(&mut de).unwrap();
            }
            let end = cursor.position() as usize;
            fields.insert(key, payload[start..end].to_vec());
        }
    }

    Incoming {
        code: header[&keys::CODE] as u32,
        sync: header[&keys::SYNC],
        fields,
    }
}

fn response(code: u32, sync: u64, body: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut payload = Vec::new();
    rmp::encode::write_map_len(&mut payload, 3).unwrap();
    rmp::encode::write_uint(&mut payload, keys::CODE as u64).unwrap();
    rmp::encode::write_uint(&mut payload, code as u64).unwrap();
    rmp::encode::write_uint(&mut payload, keys::SYNC as u64).unwrap();
    rmp::encode::write_uint(&mut payload, sync).unwrap();
    rmp::encode::write_uint(&mut payload, keys::SCHEMA_ID as u64).unwrap();
    rmp::encode::write_uint(&mut payload, 80).unwrap();
    body(&mut payload);
    build_frame(&payload)
}

/// Successful response carrying `rows`.
pub fn ok<T: Serialize + ?Sized>(sync: u64, rows: &T) -> Vec<u8> {
    response(codes::OK, sync, |payload| {
        rmp::encode::write_map_len(payload, 1).unwrap();
        rmp::encode::write_uint(payload, keys::DATA as u64).unwrap();
        MsgPackCodec::encode_into(payload, rows).unwrap();
    })
}

/// Successful response without data.
pub fn ok_empty(sync: u64) -> Vec<u8> {
    response(codes::OK, sync, |payload| {
        rmp::encode::write_map_len(payload, 0).unwrap();
    })
}

/// Error response with a database return code.
pub fn error(sync: u64, code: u32, message: &str) -> Vec<u8> {
    response(codes::ERROR | code, sync, |payload| {
        rmp::encode::write_map_len(payload, 1).unwrap();
        rmp::encode::write_uint(payload, keys::ERROR as u64).unwrap();
        rmp::encode::write_str(payload, message).unwrap();
    })
}

/// Non-final response: more frames follow for the same sync.
pub fn chunk(sync: u64) -> Vec<u8> {
    response(codes::CHUNK, sync, |payload| {
        rmp::encode::write_map_len(payload, 0).unwrap();
    })
}

/// Non-final response carrying a message.
pub fn chunk_with_message(sync: u64, message: &str) -> Vec<u8> {
    response(codes::CHUNK, sync, |payload| {
        rmp::encode::write_map_len(payload, 1).unwrap();
        rmp::encode::write_uint(payload, keys::ERROR as u64).unwrap();
        rmp::encode::write_str(payload, message).unwrap();
    })
}

/// Poll until `check` holds, panicking after a second.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
