//! In-memory forwarding device.
//!
//! Behaves like a strict P4Runtime target: INSERT on an occupied key and
//! MODIFY on an absent key are rejected, and every rule write fails until a
//! pipeline has been installed. Clones share the same dataplane, so a test
//! can keep one handle for inspection while the controller owns another.

use super::{DeviceError, ForwardingDevice, PipelineProgram, Session, TableEntry, WriteMode};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

type Shared<T> = Arc<Mutex<T>>;

/// Rule as the dataplane holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRule {
    pub action: String,
    pub params: Vec<(String, String)>,
}

impl InstalledRule {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One attempted write, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub table: String,
    pub slot: u32,
    pub mode: WriteMode,
    pub accepted: bool,
}

#[derive(Debug, Default)]
struct SimState {
    capacity: usize,
    refuse_connects: u32,
    connect_attempts: u32,
    connected: bool,
    election_id: Option<u64>,
    pipeline_installs: u32,
    pipeline: Option<PipelineProgram>,
    tables: HashMap<String, BTreeMap<u32, InstalledRule>>,
    faulty_slots: HashSet<u32>,
    writes: Vec<WriteRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct SimSwitch {
    state: Shared<SimState>,
}

impl SimSwitch {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState { capacity, ..SimState::default() })),
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_connects(self, n: u32) -> Self {
        self.state.lock().refuse_connects = n;
        self
    }

    /// Make every write to `slot` fail, whatever the mode.
    pub fn break_slot(&self, slot: u32) {
        self.state.lock().faulty_slots.insert(slot);
    }

    pub fn repair_slot(&self, slot: u32) {
        self.state.lock().faulty_slots.remove(&slot);
    }

    /// Pre-load a rule, as if a previous controller run had installed it.
    pub fn preload(&self, table: &str, slot: u32, rule: InstalledRule) {
        self.state
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(slot, rule);
    }

    pub fn entries(&self, table: &str) -> BTreeMap<u32, InstalledRule> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn occupant(&self, table: &str, slot: u32) -> Option<InstalledRule> {
        self.state.lock().tables.get(table).and_then(|t| t.get(&slot).cloned())
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    pub fn pipeline_installs(&self) -> u32 {
        self.state.lock().pipeline_installs
    }

    pub fn election_id(&self) -> Option<u64> {
        self.state.lock().election_id
    }
}

impl ForwardingDevice for SimSwitch {
    fn connect(&mut self, address: &str, device_id: u64) -> Result<Session, DeviceError> {
        let mut st = self.state.lock();
        st.connect_attempts += 1;
        if st.refuse_connects > 0 {
            st.refuse_connects -= 1;
            return Err(DeviceError::Unreachable {
                address: address.to_string(),
                reason: "connection refused".into(),
            });
        }
        st.connected = true;
        debug!(address, device_id, "sim switch connected");
        Ok(Session { address: address.to_string(), device_id })
    }

    fn handshake(&mut self, session: &Session, election_id: u64) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        if !st.connected {
            return Err(DeviceError::Unreachable {
                address: session.address.clone(),
                reason: "not connected".into(),
            });
        }
        st.election_id = Some(election_id);
        Ok(())
    }

    fn install_pipeline(
        &mut self,
        _session: &Session,
        program: &PipelineProgram,
    ) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        st.pipeline_installs += 1;
        st.pipeline = Some(program.clone());
        Ok(())
    }

    fn write_rule(
        &mut self,
        _session: &Session,
        entry: &TableEntry,
        mode: WriteMode,
    ) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        let slot = entry.match_value;
        let result = apply_write(&mut st, entry, mode);
        st.writes.push(WriteRecord {
            table: entry.table.clone(),
            slot,
            mode,
            accepted: result.is_ok(),
        });
        result
    }

    fn read_rule_count(&mut self, _session: &Session, table: &str) -> Result<usize, DeviceError> {
        let st = self.state.lock();
        if st.pipeline.is_none() {
            return Err(DeviceError::NoPipeline);
        }
        Ok(st.tables.get(table).map_or(0, BTreeMap::len))
    }
}

fn apply_write(st: &mut SimState, entry: &TableEntry, mode: WriteMode) -> Result<(), DeviceError> {
    if st.pipeline.is_none() {
        return Err(DeviceError::NoPipeline);
    }
    let slot = entry.match_value;
    if st.faulty_slots.contains(&slot) {
        return Err(DeviceError::Rejected(format!("internal error writing slot {slot}")));
    }
    let capacity = st.capacity;
    let table = st.tables.entry(entry.table.clone()).or_default();
    let rule = InstalledRule { action: entry.action.clone(), params: entry.params.clone() };

    match mode {
        WriteMode::Insert => {
            if table.contains_key(&slot) {
                return Err(DeviceError::Rejected("ALREADY_EXISTS".into()));
            }
            if table.len() >= capacity {
                return Err(DeviceError::Rejected("RESOURCE_EXHAUSTED".into()));
            }
            table.insert(slot, rule);
        }
        WriteMode::Modify => match table.get_mut(&slot) {
            Some(existing) => *existing = rule,
            None => return Err(DeviceError::Rejected("NOT_FOUND".into())),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(slot: u32, ip: &str) -> TableEntry {
        TableEntry {
            table: "t".into(),
            match_field: "k".into(),
            match_value: slot,
            action: "a".into(),
            params: vec![("ip".into(), ip.into())],
        }
    }

    fn program() -> PipelineProgram {
        PipelineProgram { p4info: "p.txtpb".into(), device_config: "p.json".into() }
    }

    #[test]
    fn writes_fail_before_pipeline() {
        let mut sw = SimSwitch::new(4);
        let s = sw.connect("sim", 0).unwrap();
        assert_eq!(sw.write_rule(&s, &entry(0, "a"), WriteMode::Insert), Err(DeviceError::NoPipeline));
    }

    #[test]
    fn insert_and_modify_semantics() {
        let mut sw = SimSwitch::new(4);
        let s = sw.connect("sim", 0).unwrap();
        sw.install_pipeline(&s, &program()).unwrap();

        assert!(sw.write_rule(&s, &entry(0, "a"), WriteMode::Modify).is_err());
        sw.write_rule(&s, &entry(0, "a"), WriteMode::Insert).unwrap();
        assert!(sw.write_rule(&s, &entry(0, "b"), WriteMode::Insert).is_err());
        sw.write_rule(&s, &entry(0, "b"), WriteMode::Modify).unwrap();

        assert_eq!(sw.occupant("t", 0).unwrap().param("ip"), Some("b"));
        assert_eq!(sw.read_rule_count(&s, "t").unwrap(), 1);
        assert_eq!(sw.writes().iter().filter(|w| w.accepted).count(), 2);
    }

    #[test]
    fn capacity_limits_inserts() {
        let mut sw = SimSwitch::new(1);
        let s = sw.connect("sim", 0).unwrap();
        sw.install_pipeline(&s, &program()).unwrap();
        sw.write_rule(&s, &entry(0, "a"), WriteMode::Insert).unwrap();
        assert_eq!(
            sw.write_rule(&s, &entry(1, "b"), WriteMode::Insert),
            Err(DeviceError::Rejected("RESOURCE_EXHAUSTED".into()))
        );
    }

    #[test]
    fn refused_connects_are_counted() {
        let mut sw = SimSwitch::new(1).refuse_connects(2);
        assert!(sw.connect("sim", 0).is_err());
        assert!(sw.connect("sim", 0).is_err());
        assert!(sw.connect("sim", 0).is_ok());
        assert_eq!(sw.connect_attempts(), 3);
    }
}
