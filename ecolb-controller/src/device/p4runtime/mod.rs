//! P4Runtime backend (BMv2 `simple_switch_grpc` and other P4Runtime targets).
//!
//! The controller loop is blocking, so the device owns a small tokio runtime
//! and blocks on each RPC. The arbitration stream stays open for the life of
//! the device: dropping it gives up primary status.
//!
//! P4Info must be the binary protobuf (`p4c --p4runtime-files x.p4info.bin`).
//! It is pushed to the switch as-is and indexed locally to turn table,
//! action and field names into ids.

pub mod proto;

use super::{DeviceError, ForwardingDevice, PipelineProgram, Session, TableEntry, WriteMode};
use futures::channel::mpsc;
use prost::Message;
use proto::{
    pipeline_action, update_type, ActionParam, Entity, EntityKind, FieldMatch, FieldMatchExact,
    FieldMatchType, ForwardingPipelineConfig, MasterArbitrationUpdate, P4Info, ReadRequest,
    ReadResponse, SetForwardingPipelineConfigRequest, SetForwardingPipelineConfigResponse,
    StreamMessageRequest, StreamMessageResponse, StreamRequestUpdate, StreamResponseUpdate,
    TableAction, TableActionType, Uint128, Update, WriteRequest, WriteResponse,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Runtime;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tracing::{debug, info, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// `google.rpc.Code` values the arbitration reply carries.
const RPC_OK: i32 = 0;
const RPC_ALREADY_EXISTS: i32 = 6;

fn method(name: &'static str) -> PathAndQuery {
    PathAndQuery::from_static(name)
}

fn status_error(op: &str, status: Status) -> DeviceError {
    match status.code() {
        Code::Unavailable | Code::DeadlineExceeded => {
            DeviceError::Io(format!("{op}: {}", status.message()))
        }
        code => DeviceError::Rejected(format!("{op}: {code:?}: {}", status.message())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldInfo {
    id: u32,
    bitwidth: u32,
}

#[derive(Debug, Clone, Default)]
struct NamedItem {
    id: u32,
    fields: HashMap<String, FieldInfo>,
}

/// Name to id lookup built from a P4Info. Items are reachable by full name
/// (`MyIngress.ecmp_nhop`) and by alias (`ecmp_nhop`).
#[derive(Debug, Clone, Default)]
pub struct P4InfoIndex {
    tables: HashMap<String, NamedItem>,
    actions: HashMap<String, NamedItem>,
}

impl P4InfoIndex {
    pub fn decode(bytes: &[u8]) -> Result<Self, DeviceError> {
        let info = P4Info::decode(bytes)
            .map_err(|e| DeviceError::Rejected(format!("p4info is not binary protobuf: {e}")))?;
        if info.tables.is_empty() && info.actions.is_empty() {
            return Err(DeviceError::Rejected("p4info declares no tables or actions".into()));
        }

        let mut index = Self::default();
        for table in info.tables {
            let Some(pre) = table.preamble else { continue };
            let fields = table
                .match_fields
                .into_iter()
                .map(|f| (f.name, FieldInfo { id: f.id, bitwidth: f.bitwidth.max(0) as u32 }))
                .collect();
            insert_named(&mut index.tables, pre.name, pre.alias, NamedItem { id: pre.id, fields });
        }
        for action in info.actions {
            let Some(pre) = action.preamble else { continue };
            let fields = action
                .params
                .into_iter()
                .map(|p| (p.name, FieldInfo { id: p.id, bitwidth: p.bitwidth.max(0) as u32 }))
                .collect();
            insert_named(&mut index.actions, pre.name, pre.alias, NamedItem { id: pre.id, fields });
        }
        Ok(index)
    }

    fn table(&self, name: &str) -> Result<&NamedItem, DeviceError> {
        self.tables
            .get(name)
            .ok_or_else(|| DeviceError::Rejected(format!("table {name} not in p4info")))
    }

    fn action(&self, name: &str) -> Result<&NamedItem, DeviceError> {
        self.actions
            .get(name)
            .ok_or_else(|| DeviceError::Rejected(format!("action {name} not in p4info")))
    }

    pub fn table_id(&self, name: &str) -> Result<u32, DeviceError> {
        Ok(self.table(name)?.id)
    }

    /// Translate a rule into a P4Runtime table entry.
    pub fn table_entry(&self, entry: &TableEntry) -> Result<proto::TableEntry, DeviceError> {
        let table = self.table(&entry.table)?;
        let field = table.fields.get(&entry.match_field).ok_or_else(|| {
            DeviceError::Rejected(format!("{} has no match field {}", entry.table, entry.match_field))
        })?;
        let action = self.action(&entry.action)?;

        let params = entry
            .params
            .iter()
            .map(|(name, value)| {
                let info = action.fields.get(name).ok_or_else(|| {
                    DeviceError::Rejected(format!("{} has no parameter {name}", entry.action))
                })?;
                Ok(ActionParam { param_id: info.id, value: encode_value(value, info.bitwidth)? })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;

        Ok(proto::TableEntry {
            table_id: table.id,
            r#match: vec![FieldMatch {
                field_id: field.id,
                field_match_type: Some(FieldMatchType::Exact(FieldMatchExact {
                    value: encode_value(&entry.match_value.to_string(), field.bitwidth)?,
                })),
            }],
            action: Some(TableAction {
                r#type: Some(TableActionType::Action(proto::Action { action_id: action.id, params })),
            }),
            priority: 0,
        })
    }
}

fn insert_named(map: &mut HashMap<String, NamedItem>, name: String, alias: String, item: NamedItem) {
    if !alias.is_empty() && alias != name {
        map.insert(alias, item.clone());
    }
    map.insert(name, item);
}

/// Big-endian bytes padded to `bitwidth`. Accepts MAC (`aa:bb:..`), dotted
/// IPv4 and decimal integers, the forms rule params are written in.
pub fn encode_value(text: &str, bitwidth: u32) -> Result<Vec<u8>, DeviceError> {
    let bad = || DeviceError::Rejected(format!("cannot encode {text:?} in {bitwidth} bits"));
    let value: u128 = if let Ok(ip) = text.parse::<Ipv4Addr>() {
        u32::from(ip) as u128
    } else if text.contains(':') {
        let mut v = 0u128;
        for octet in text.split(':') {
            v = (v << 8) | u8::from_str_radix(octet, 16).map_err(|_| bad())? as u128;
        }
        v
    } else {
        text.parse().map_err(|_| bad())?
    };

    if bitwidth == 0 || bitwidth > 128 || (bitwidth < 128 && value >> bitwidth != 0) {
        return Err(bad());
    }
    let width = bitwidth.div_ceil(8) as usize;
    Ok(value.to_be_bytes()[16 - width..].to_vec())
}

/// Primary when the switch answers with OK for our own election id.
fn check_arbitration(reply: &MasterArbitrationUpdate, election_id: u64) -> Result<(), DeviceError> {
    let status = reply.status.clone().unwrap_or_default();
    let winner = reply.election_id.map(|e| e.low).unwrap_or_default();
    match status.code {
        RPC_OK if winner == election_id => Ok(()),
        RPC_OK | RPC_ALREADY_EXISTS => Err(DeviceError::Rejected(format!(
            "not primary: election id {election_id}, primary holds {winner}"
        ))),
        code => Err(DeviceError::Rejected(format!("arbitration failed ({code}): {}", status.message))),
    }
}

fn check_program_format(path: &Path) -> Result<(), DeviceError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt" | "txtpb" | "json") => Err(DeviceError::Rejected(format!(
            "{} is not binary p4info; compile with --p4runtime-files <name>.p4info.bin",
            path.display()
        ))),
        _ => Ok(()),
    }
}

/// Arbitration stream. Holding the sender keeps the stream, and primary
/// status, alive.
struct Arbitration {
    _requests: mpsc::UnboundedSender<StreamMessageRequest>,
    election_id: Uint128,
}

pub struct P4RuntimeDevice {
    runtime: Runtime,
    client: Option<Grpc<Channel>>,
    arbitration: Option<Arbitration>,
    index: Option<P4InfoIndex>,
}

impl P4RuntimeDevice {
    pub fn new() -> Result<Self, DeviceError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("p4runtime")
            .enable_all()
            .build()
            .map_err(|e| DeviceError::Io(format!("p4runtime worker: {e}")))?;
        Ok(Self { runtime, client: None, arbitration: None, index: None })
    }

    fn block_on<F: Future>(&self, op: &str, fut: F) -> Result<F::Output, DeviceError> {
        self.runtime
            .block_on(async { tokio::time::timeout(RPC_TIMEOUT, fut).await })
            .map_err(|_| DeviceError::Io(format!("{op} timed out after {RPC_TIMEOUT:?}")))
    }

    fn client(&self, session: &Session) -> Result<Grpc<Channel>, DeviceError> {
        self.client.clone().ok_or_else(|| DeviceError::Unreachable {
            address: session.address.clone(),
            reason: "not connected".into(),
        })
    }

    fn election_id(&self) -> Result<Uint128, DeviceError> {
        self.arbitration
            .as_ref()
            .map(|a| a.election_id)
            .ok_or_else(|| DeviceError::Rejected("no arbitration, handshake first".into()))
    }

    fn index(&self) -> Result<&P4InfoIndex, DeviceError> {
        self.index.as_ref().ok_or(DeviceError::NoPipeline)
    }
}

impl ForwardingDevice for P4RuntimeDevice {
    fn connect(&mut self, address: &str, device_id: u64) -> Result<Session, DeviceError> {
        let unreachable = |reason: String| DeviceError::Unreachable { address: address.to_string(), reason };
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|e| unreachable(e.to_string()))?
            .connect_timeout(CONNECT_TIMEOUT);

        let channel = self
            .block_on("connect", endpoint.connect())
            .map_err(|e| unreachable(e.to_string()))?
            .map_err(|e| unreachable(e.to_string()))?;

        self.client = Some(Grpc::new(channel));
        self.arbitration = None;
        self.index = None;
        info!(address, device_id, "p4runtime channel open");
        Ok(Session { address: address.to_string(), device_id })
    }

    fn handshake(&mut self, session: &Session, election_id: u64) -> Result<(), DeviceError> {
        let mut grpc = self.client(session)?;
        let (tx, rx) = mpsc::unbounded();
        let hello = StreamMessageRequest {
            update: Some(StreamRequestUpdate::Arbitration(MasterArbitrationUpdate {
                device_id: session.device_id,
                election_id: Some(election_id.into()),
                status: None,
            })),
        };
        tx.unbounded_send(hello)
            .map_err(|e| DeviceError::Io(format!("arbitration stream: {e}")))?;

        let mut inbound = self.block_on("arbitration", async {
            grpc.ready().await.map_err(|e| DeviceError::Io(e.to_string()))?;
            let codec: ProstCodec<StreamMessageRequest, StreamMessageResponse> = ProstCodec::default();
            grpc.streaming(Request::new(rx), method("/p4.v1.P4Runtime/StreamChannel"), codec)
                .await
                .map(|resp| resp.into_inner())
                .map_err(|s| status_error("StreamChannel", s))
        })??;

        let reply = self.block_on("arbitration", async {
            loop {
                match inbound.message().await {
                    Ok(Some(StreamMessageResponse { update: Some(StreamResponseUpdate::Arbitration(a)) })) => {
                        return Ok(a)
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => return Err(DeviceError::Rejected("stream closed before arbitration".into())),
                    Err(s) => return Err(status_error("StreamChannel", s)),
                }
            }
        })??;
        check_arbitration(&reply, election_id)?;

        // keep draining so mastership changes show up in the log
        self.runtime.spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(StreamMessageResponse { update: Some(StreamResponseUpdate::Arbitration(a)) })) => {
                        let code = a.status.map(|s| s.code).unwrap_or_default();
                        warn!(code, primary = ?a.election_id.map(|e| e.low), "arbitration changed");
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!("p4runtime stream closed by switch");
                        return;
                    }
                    Err(s) => {
                        warn!(code = ?s.code(), message = s.message(), "p4runtime stream error");
                        return;
                    }
                }
            }
        });

        self.arbitration = Some(Arbitration { _requests: tx, election_id: election_id.into() });
        info!(device_id = session.device_id, election_id, "primary for device");
        Ok(())
    }

    fn install_pipeline(
        &mut self,
        session: &Session,
        program: &PipelineProgram,
    ) -> Result<(), DeviceError> {
        let mut grpc = self.client(session)?;
        let election_id = self.election_id()?;

        check_program_format(&program.p4info)?;
        let read = |path: &Path| {
            std::fs::read(path).map_err(|e| DeviceError::Io(format!("{}: {e}", path.display())))
        };
        let p4info = read(&program.p4info)?;
        let device_config = read(&program.device_config)?;
        let index = P4InfoIndex::decode(&p4info)?;

        let request = SetForwardingPipelineConfigRequest {
            device_id: session.device_id,
            election_id: Some(election_id),
            action: pipeline_action::VERIFY_AND_COMMIT,
            config: Some(ForwardingPipelineConfig { p4info, p4_device_config: device_config }),
        };
        self.block_on("SetForwardingPipelineConfig", async {
            grpc.ready().await.map_err(|e| DeviceError::Io(e.to_string()))?;
            let codec: ProstCodec<SetForwardingPipelineConfigRequest, SetForwardingPipelineConfigResponse> =
                ProstCodec::default();
            grpc.unary(
                Request::new(request),
                method("/p4.v1.P4Runtime/SetForwardingPipelineConfig"),
                codec,
            )
            .await
            .map_err(|s| status_error("SetForwardingPipelineConfig", s))
        })??;

        info!(
            p4info = %program.p4info.display(),
            device_config = %program.device_config.display(),
            tables = index.tables.len(),
            "pipeline committed"
        );
        self.index = Some(index);
        Ok(())
    }

    fn write_rule(
        &mut self,
        session: &Session,
        entry: &TableEntry,
        mode: WriteMode,
    ) -> Result<(), DeviceError> {
        let mut grpc = self.client(session)?;
        let election_id = self.election_id()?;
        let table_entry = self.index()?.table_entry(entry)?;

        let request = WriteRequest {
            device_id: session.device_id,
            election_id: Some(election_id),
            updates: vec![Update {
                r#type: match mode {
                    WriteMode::Insert => update_type::INSERT,
                    WriteMode::Modify => update_type::MODIFY,
                },
                entity: Some(Entity { entity: Some(EntityKind::TableEntry(table_entry)) }),
            }],
        };
        debug!(table = %entry.table, key = entry.match_value, %mode, bytes = request.encoded_len(), "write");
        self.block_on("Write", async {
            grpc.ready().await.map_err(|e| DeviceError::Io(e.to_string()))?;
            let codec: ProstCodec<WriteRequest, WriteResponse> = ProstCodec::default();
            grpc.unary(Request::new(request), method("/p4.v1.P4Runtime/Write"), codec)
                .await
                .map_err(|s| status_error("Write", s))
        })??;
        Ok(())
    }

    fn read_rule_count(&mut self, session: &Session, table: &str) -> Result<usize, DeviceError> {
        let mut grpc = self.client(session)?;
        let table_id = self.index()?.table_id(table)?;
        let request = ReadRequest {
            device_id: session.device_id,
            entities: vec![Entity {
                entity: Some(EntityKind::TableEntry(proto::TableEntry { table_id, ..Default::default() })),
            }],
        };

        self.block_on("Read", async {
            grpc.ready().await.map_err(|e| DeviceError::Io(e.to_string()))?;
            let codec: ProstCodec<ReadRequest, ReadResponse> = ProstCodec::default();
            let mut stream = grpc
                .server_streaming(Request::new(request), method("/p4.v1.P4Runtime/Read"), codec)
                .await
                .map_err(|s| status_error("Read", s))?
                .into_inner();
            let mut count = 0;
            while let Some(resp) = stream.message().await.map_err(|s| status_error("Read", s))? {
                count += resp.entities.len();
            }
            Ok::<usize, DeviceError>(count)
        })?
    }
}
