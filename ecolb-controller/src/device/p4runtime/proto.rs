//! The slice of `p4.v1` / `p4.config.v1` the controller speaks.
//!
//! Tags follow `p4runtime.proto` and `p4info.proto`. Fields the controller
//! never sets or reads are left out; prost skips them on decode. The P4Info
//! inside `ForwardingPipelineConfig` is carried as the raw bytes of the
//! compiled file, which is the same wire encoding as the embedded message.

use prost::Message;

pub const SERVICE: &str = "p4.v1.P4Runtime";

pub mod update_type {
    pub const INSERT: i32 = 1;
    pub const MODIFY: i32 = 2;
}

pub mod pipeline_action {
    pub const VERIFY_AND_COMMIT: i32 = 3;
}

#[derive(Clone, Copy, PartialEq, Eq, Message)]
pub struct Uint128 {
    #[prost(uint64, tag = "1")]
    pub high: u64,
    #[prost(uint64, tag = "2")]
    pub low: u64,
}

impl From<u64> for Uint128 {
    fn from(low: u64) -> Self {
        Self { high: 0, low }
    }
}

/// `google.rpc.Status`, without details.
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MasterArbitrationUpdate {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, optional, tag = "3")]
    pub election_id: Option<Uint128>,
    #[prost(message, optional, tag = "4")]
    pub status: Option<RpcStatus>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamMessageRequest {
    #[prost(oneof = "StreamRequestUpdate", tags = "1")]
    pub update: Option<StreamRequestUpdate>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum StreamRequestUpdate {
    #[prost(message, tag = "1")]
    Arbitration(MasterArbitrationUpdate),
}

#[derive(Clone, PartialEq, Message)]
pub struct StreamMessageResponse {
    #[prost(oneof = "StreamResponseUpdate", tags = "1")]
    pub update: Option<StreamResponseUpdate>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum StreamResponseUpdate {
    #[prost(message, tag = "1")]
    Arbitration(MasterArbitrationUpdate),
}

#[derive(Clone, PartialEq, Message)]
pub struct ForwardingPipelineConfig {
    /// Serialized `p4.config.v1.P4Info`.
    #[prost(bytes = "vec", tag = "1")]
    pub p4info: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub p4_device_config: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetForwardingPipelineConfigRequest {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, optional, tag = "3")]
    pub election_id: Option<Uint128>,
    #[prost(int32, tag = "4")]
    pub action: i32,
    #[prost(message, optional, tag = "5")]
    pub config: Option<ForwardingPipelineConfig>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetForwardingPipelineConfigResponse {}

#[derive(Clone, PartialEq, Message)]
pub struct FieldMatchExact {
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum FieldMatchType {
    #[prost(message, tag = "2")]
    Exact(FieldMatchExact),
}

#[derive(Clone, PartialEq, Message)]
pub struct FieldMatch {
    #[prost(uint32, tag = "1")]
    pub field_id: u32,
    #[prost(oneof = "FieldMatchType", tags = "2")]
    pub field_match_type: Option<FieldMatchType>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ActionParam {
    #[prost(uint32, tag = "2")]
    pub param_id: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Action {
    #[prost(uint32, tag = "1")]
    pub action_id: u32,
    #[prost(message, repeated, tag = "4")]
    pub params: Vec<ActionParam>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum TableActionType {
    #[prost(message, tag = "1")]
    Action(Action),
}

#[derive(Clone, PartialEq, Message)]
pub struct TableAction {
    #[prost(oneof = "TableActionType", tags = "1")]
    pub r#type: Option<TableActionType>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TableEntry {
    #[prost(uint32, tag = "1")]
    pub table_id: u32,
    #[prost(message, repeated, tag = "2")]
    pub r#match: Vec<FieldMatch>,
    #[prost(message, optional, tag = "3")]
    pub action: Option<TableAction>,
    #[prost(int32, tag = "4")]
    pub priority: i32,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum EntityKind {
    #[prost(message, tag = "2")]
    TableEntry(TableEntry),
}

#[derive(Clone, PartialEq, Message)]
pub struct Entity {
    #[prost(oneof = "EntityKind", tags = "2")]
    pub entity: Option<EntityKind>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Update {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub entity: Option<Entity>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WriteRequest {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, optional, tag = "3")]
    pub election_id: Option<Uint128>,
    #[prost(message, repeated, tag = "4")]
    pub updates: Vec<Update>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WriteResponse {}

#[derive(Clone, PartialEq, Message)]
pub struct ReadRequest {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, repeated, tag = "2")]
    pub entities: Vec<Entity>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReadResponse {
    #[prost(message, repeated, tag = "1")]
    pub entities: Vec<Entity>,
}

// p4.config.v1

#[derive(Clone, PartialEq, Message)]
pub struct Preamble {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub alias: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MatchFieldInfo {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "4")]
    pub bitwidth: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct TableInfo {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, repeated, tag = "2")]
    pub match_fields: Vec<MatchFieldInfo>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ActionParamInfo {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "4")]
    pub bitwidth: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ActionInfo {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, repeated, tag = "2")]
    pub params: Vec<ActionParamInfo>,
}

#[derive(Clone, PartialEq, Message)]
pub struct P4Info {
    #[prost(message, repeated, tag = "2")]
    pub tables: Vec<TableInfo>,
    #[prost(message, repeated, tag = "3")]
    pub actions: Vec<ActionInfo>,
}
