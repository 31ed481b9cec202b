//! The shared record: canonical wire format of the rendezvous protocol
//!
//! One fixed-size structure mapped identically into both processes'
//! address spaces. The layout is a contract: the peer may be built by a
//! different toolchain, so the total size and every field offset are
//! pinned and checked at compile time.
//!
//! Every 32-bit field is viewed through an atomic of identical layout so
//! the mapping can be accessed soundly behind `&SharedRecord` from both
//! sides. Only `flags` carries ordering: its store publishes every field
//! write that precedes it, and a load that observes a transition also
//! observes those writes. All other fields use relaxed operations.

use crate::{ChannelError, Phase, Result, PROTOCOL_MAGIC, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};

/// Capacity of each bounded string buffer, terminator included.
pub const BUFFER_CAPACITY: usize = 256;

/// Total record size in bytes, identical for every conforming peer.
pub const SHARED_RECORD_SIZE: usize = 548;

/// Bounded zero-terminated byte buffer.
///
/// Writers truncate to capacity minus one (never splitting a UTF-8
/// sequence) and always terminate; readers stop at the first zero and
/// never trust anything beyond it.
#[repr(transparent)]
pub struct BoundedBuffer([AtomicU8; BUFFER_CAPACITY]);

impl BoundedBuffer {
    /// Store a string, applying the truncation rule.
    pub fn store(&self, value: &str) {
        let mut len = value.len().min(BUFFER_CAPACITY - 1);
        while !value.is_char_boundary(len) {
            len -= 1;
        }
        for (slot, byte) in self.0.iter().zip(&value.as_bytes()[..len]) {
            slot.store(*byte, Ordering::Relaxed);
        }
        // Zero the tail so no stale bytes survive past the terminator.
        for slot in &self.0[len..] {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Read back up to the first terminator, validating UTF-8.
    pub fn load(&self) -> Result<String> {
        let mut bytes = Vec::new();
        for slot in &self.0 {
            match slot.load(Ordering::Relaxed) {
                0 => break,
                byte => bytes.push(byte),
            }
        }
        String::from_utf8(bytes)
            .map_err(|e| ChannelError::Corruption(format!("buffer is not valid UTF-8: {e}")))
    }

    /// Zero the whole buffer.
    pub fn clear(&self) {
        for slot in &self.0 {
            slot.store(0, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    fn zeroed() -> Self {
        Self(std::array::from_fn(|_| AtomicU8::new(0)))
    }
}

/// The 548-byte record exchanged between master and slave.
///
/// Field order and offsets are fixed (see the layout asserts below); the
/// Rust view adds no padding because every field is 4-byte aligned.
#[repr(C)]
pub struct SharedRecord {
    magic: AtomicU32,                 // offset 0
    version: AtomicU32,               // offset 4
    results_folder_path: BoundedBuffer, // offset 8
    start_number: AtomicI32,          // offset 264
    end_number: AtomicI32,            // offset 268
    request_counter: AtomicU32,       // offset 272
    response_counter: AtomicU32,      // offset 276
    result_file_name: BoundedBuffer,  // offset 280
    code_result: AtomicI32,           // offset 536
    sum_result: AtomicI32,            // offset 540
    flags: AtomicU32,                 // offset 544
}

const _: () = {
    use std::mem::{offset_of, size_of};
    assert!(size_of::<SharedRecord>() == SHARED_RECORD_SIZE);
    assert!(offset_of!(SharedRecord, magic) == 0);
    assert!(offset_of!(SharedRecord, version) == 4);
    assert!(offset_of!(SharedRecord, results_folder_path) == 8);
    assert!(offset_of!(SharedRecord, start_number) == 264);
    assert!(offset_of!(SharedRecord, end_number) == 268);
    assert!(offset_of!(SharedRecord, request_counter) == 272);
    assert!(offset_of!(SharedRecord, response_counter) == 276);
    assert!(offset_of!(SharedRecord, result_file_name) == 280);
    assert!(offset_of!(SharedRecord, code_result) == 536);
    assert!(offset_of!(SharedRecord, sum_result) == 540);
    assert!(offset_of!(SharedRecord, flags) == 544);
};

/// Input half of the record, as copied out by the slave at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    pub folder: String,
    pub start: i32,
    pub end: i32,
    pub counter: u32,
}

/// Output half of the record, as copied out by the master on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordResponse {
    pub code: i32,
    pub sum: i32,
    pub file_name: String,
    pub counter: u32,
}

impl SharedRecord {
    /// First-time initialization of a freshly created region. The mapping
    /// arrives zero-filled from the OS; this stamps the identity fields
    /// and arms the channel.
    pub(crate) fn initialize(&self) {
        self.results_folder_path.clear();
        self.result_file_name.clear();
        self.start_number.store(0, Ordering::Relaxed);
        self.end_number.store(0, Ordering::Relaxed);
        self.request_counter.store(0, Ordering::Relaxed);
        self.response_counter.store(0, Ordering::Relaxed);
        self.code_result.store(0, Ordering::Relaxed);
        self.sum_result.store(0, Ordering::Relaxed);
        self.magic.store(PROTOCOL_MAGIC, Ordering::Relaxed);
        self.version.store(PROTOCOL_VERSION, Ordering::Relaxed);
        self.flags.store(Phase::Idle.as_raw(), Ordering::SeqCst);
    }

    /// Verify magic and version before trusting anything else.
    pub fn validate(&self) -> Result<()> {
        let magic = self.magic.load(Ordering::Relaxed);
        if magic != PROTOCOL_MAGIC {
            return Err(ChannelError::Corruption(format!(
                "bad magic {magic:#010x}, expected {PROTOCOL_MAGIC:#010x}"
            )));
        }
        let version = self.version.load(Ordering::Relaxed);
        if version != PROTOCOL_VERSION {
            return Err(ChannelError::Corruption(format!(
                "unsupported version {version}, expected {PROTOCOL_VERSION}"
            )));
        }
        Ok(())
    }

    /// Current protocol phase. An undefined raw value is corruption.
    pub fn phase(&self) -> Result<Phase> {
        let raw = self.flags.load(Ordering::SeqCst);
        Phase::from_raw(raw)
            .ok_or_else(|| ChannelError::Corruption(format!("undefined flag value {raw:#010x}")))
    }

    /// Advance the flag. The store publishes every record write made
    /// before it, so it must be the last write of any transition.
    pub fn set_phase(&self, phase: Phase) {
        self.flags.store(phase.as_raw(), Ordering::SeqCst);
    }

    pub fn request_counter(&self) -> u32 {
        self.request_counter.load(Ordering::Relaxed)
    }

    /// Master side: populate the input fields for cycle `counter`.
    /// The caller signals `MasterReady` separately, afterwards.
    pub fn set_request(&self, folder: &str, start: i32, end: i32, counter: u32) {
        self.results_folder_path.store(folder);
        self.start_number.store(start, Ordering::Relaxed);
        self.end_number.store(end, Ordering::Relaxed);
        self.request_counter.store(counter, Ordering::Relaxed);
    }

    /// Master side: clear the output fields left by a prior cycle.
    pub fn clear_response(&self) {
        self.result_file_name.clear();
        self.code_result.store(0, Ordering::Relaxed);
        self.sum_result.store(0, Ordering::Relaxed);
        self.response_counter.store(0, Ordering::Relaxed);
    }

    /// Slave side: copy out the inputs after observing `MasterReady`.
    pub fn request(&self) -> Result<RecordRequest> {
        Ok(RecordRequest {
            folder: self.results_folder_path.load()?,
            start: self.start_number.load(Ordering::Relaxed),
            end: self.end_number.load(Ordering::Relaxed),
            counter: self.request_counter.load(Ordering::Relaxed),
        })
    }

    /// Slave side: populate the output fields, echoing the request
    /// counter read at dispatch time. The caller signals `SlaveFinished`
    /// separately, afterwards.
    pub fn set_response(&self, code: i32, sum: i32, file_name: &str, counter: u32) {
        self.result_file_name.store(file_name);
        self.code_result.store(code, Ordering::Relaxed);
        self.sum_result.store(sum, Ordering::Relaxed);
        self.response_counter.store(counter, Ordering::Relaxed);
    }

    /// Master side: copy out the outputs after observing `SlaveFinished`.
    pub fn response(&self) -> Result<RecordResponse> {
        Ok(RecordResponse {
            code: self.code_result.load(Ordering::Relaxed),
            sum: self.sum_result.load(Ordering::Relaxed),
            file_name: self.result_file_name.load()?,
            counter: self.response_counter.load(Ordering::Relaxed),
        })
    }

    #[cfg(test)]
    pub(crate) fn scribble_magic(&self) {
        self.magic.store(0, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn zeroed() -> Self {
        Self {
            magic: AtomicU32::new(0),
            version: AtomicU32::new(0),
            results_folder_path: BoundedBuffer::zeroed(),
            start_number: AtomicI32::new(0),
            end_number: AtomicI32::new(0),
            request_counter: AtomicU32::new(0),
            response_counter: AtomicU32::new(0),
            result_file_name: BoundedBuffer::zeroed(),
            code_result: AtomicI32::new(0),
            sum_result: AtomicI32::new(0),
            flags: AtomicU32::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_pinned() {
        assert_eq!(std::mem::size_of::<SharedRecord>(), 548);
        assert_eq!(std::mem::align_of::<SharedRecord>(), 4);
    }

    #[test]
    fn initialize_then_validate() {
        let record = SharedRecord::zeroed();
        assert!(record.validate().is_err());

        record.initialize();
        record.validate().unwrap();
        assert_eq!(record.phase().unwrap(), Phase::Idle);
        assert_eq!(record.request_counter(), 0);
    }

    #[test]
    fn validate_rejects_bad_magic_and_version() {
        let record = SharedRecord::zeroed();
        record.initialize();

        record.magic.store(0x12345678, Ordering::Relaxed);
        assert!(matches!(record.validate(), Err(ChannelError::Corruption(_))));

        record.magic.store(PROTOCOL_MAGIC, Ordering::Relaxed);
        record.version.store(99, Ordering::Relaxed);
        assert!(matches!(record.validate(), Err(ChannelError::Corruption(_))));
    }

    #[test]
    fn undefined_flag_value_is_corruption() {
        let record = SharedRecord::zeroed();
        record.initialize();
        record.flags.store(0xFF, Ordering::SeqCst);
        assert!(matches!(record.phase(), Err(ChannelError::Corruption(_))));
    }

    #[test]
    fn request_round_trip() {
        let record = SharedRecord::zeroed();
        record.initialize();
        record.set_request("/tmp/outputs", 0, 100, 7);

        let request = record.request().unwrap();
        assert_eq!(request.folder, "/tmp/outputs");
        assert_eq!(request.start, 0);
        assert_eq!(request.end, 100);
        assert_eq!(request.counter, 7);
    }

    #[test]
    fn response_round_trip_and_clear() {
        let record = SharedRecord::zeroed();
        record.initialize();
        record.set_response(0, 5050, "result_1.txt", 1);

        let response = record.response().unwrap();
        assert_eq!(response.sum, 5050);
        assert_eq!(response.file_name, "result_1.txt");
        assert_eq!(response.counter, 1);

        record.clear_response();
        let cleared = record.response().unwrap();
        assert_eq!(cleared.code, 0);
        assert_eq!(cleared.sum, 0);
        assert_eq!(cleared.counter, 0);
        assert!(cleared.file_name.is_empty());
    }

    #[test]
    fn buffer_truncates_to_capacity_minus_one() {
        let buffer = BoundedBuffer::zeroed();
        let long = "x".repeat(BUFFER_CAPACITY * 2);
        buffer.store(&long);

        let read = buffer.load().unwrap();
        assert_eq!(read.len(), BUFFER_CAPACITY - 1);
        assert_eq!(buffer.0[BUFFER_CAPACITY - 1].load(Ordering::Relaxed), 0);
    }

    #[test]
    fn buffer_truncation_respects_char_boundaries() {
        // 2-byte characters do not divide 255 evenly, so a naive byte cut
        // would split the final character.
        let buffer = BoundedBuffer::zeroed();
        let long = "é".repeat(BUFFER_CAPACITY);
        buffer.store(&long);

        let read = buffer.load().unwrap();
        assert!(read.len() <= BUFFER_CAPACITY - 1);
        assert!(read.chars().all(|c| c == 'é'));
    }

    #[test]
    fn buffer_overwrite_leaves_no_stale_tail() {
        let buffer = BoundedBuffer::zeroed();
        buffer.store("a_rather_long_first_value");
        buffer.store("short");
        assert_eq!(buffer.load().unwrap(), "short");
        assert_eq!(buffer.0[6].load(Ordering::Relaxed), 0);
    }

    #[test]
    fn buffer_rejects_invalid_utf8() {
        let buffer = BoundedBuffer::zeroed();
        buffer.0[0].store(0xFF, Ordering::Relaxed);
        buffer.0[1].store(0xFE, Ordering::Relaxed);
        assert!(matches!(buffer.load(), Err(ChannelError::Corruption(_))));
    }
}
