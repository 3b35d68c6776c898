//! Common data types shared across components
//!
//! This module defines the event record carried on the wire and the control
//! command infrastructure shared by all pipeline components.

// Control protocol types
pub mod command;
pub use command::{
    ComponentState, ControlReply, ControlRequest, HeartbeatMessage, StateChangeCommand,
    StateChangeResponse, StatusReport,
};

// Component state machine and hook trait
pub mod fsm;
pub use fsm::{ComponentFsm, ComponentHooks, FsmSnapshot};

// Shared infrastructure
pub mod cli;
pub mod command_task;
pub mod error;
pub mod metrics;
pub mod shutdown;

pub use command_task::run_control_task;
pub use error::{PipelineError, PipelineResult};

// The wire format stores every field little-endian and the fast paths assume
// the host matches it.
#[cfg(not(target_endian = "little"))]
compile_error!("DELILA2 networking requires a little-endian platform");

/// Serialized size of the fixed per-event header (fields in canonical order)
pub const EVENT_HEADER_SIZE: usize = 34;

/// Serialized size of one waveform sample (u16 ADC + u64 timestamp, packed)
pub const WAVEFORM_SAMPLE_SIZE: usize = 10;

/// Flag bit definitions carried in `EventData::flags`
pub mod flags {
    /// Pileup detected
    pub const FLAG_PILEUP: u64 = 0x01;
    /// Trigger lost
    pub const FLAG_TRIGGER_LOST: u64 = 0x02;
    /// Signal saturation (over range)
    pub const FLAG_OVER_RANGE: u64 = 0x04;
    /// 1024 trigger count
    pub const FLAG_1024_TRIGGER: u64 = 0x08;
    /// N lost triggers
    pub const FLAG_N_LOST_TRIGGER: u64 = 0x10;
}

/// One waveform sample: raw ADC value plus its absolute timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaveformSample {
    /// ADC value
    pub adc_value: u16,
    /// Timestamp in nanoseconds
    pub timestamp_ns: u64,
}

impl WaveformSample {
    pub fn new(adc_value: u16, timestamp_ns: u64) -> Self {
        Self {
            adc_value,
            timestamp_ns,
        }
    }
}

/// One digitized detector event
///
/// Scalar fields are serialized back-to-back in canonical (alphabetical)
/// order, little-endian, with no padding; the 34-byte fixed header is
/// followed by `waveform.len()` packed 10-byte samples. The on-wire
/// `waveformSize` field always reflects the actual sample count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventData {
    /// Analog probe 1 type tag
    pub analog_probe1_type: u8,
    /// Analog probe 2 type tag
    pub analog_probe2_type: u8,
    /// Channel within module (0-63 for current hardware)
    pub channel: u8,
    /// Digital probe 1 type tag
    pub digital_probe1_type: u8,
    /// Digital probe 2 type tag
    pub digital_probe2_type: u8,
    /// Digital probe 3 type tag
    pub digital_probe3_type: u8,
    /// Digital probe 4 type tag
    pub digital_probe4_type: u8,
    /// Down-sampling factor (1-8)
    pub down_sample_factor: u8,
    /// Primary energy measurement
    pub energy: u16,
    /// Short gate energy (for PSD)
    pub energy_short: u16,
    /// Status/error flags
    pub flags: u64,
    /// Hardware module ID (0-255)
    pub module: u8,
    /// Time base code
    pub time_resolution: u8,
    /// Timestamp in nanoseconds
    pub timestamp_ns: f64,
    /// Waveform samples (the on-wire count always equals `waveform.len()`)
    pub waveform: Vec<WaveformSample>,
}

impl EventData {
    /// Create an event with the commonly used fields set
    pub fn new(
        module: u8,
        channel: u8,
        energy: u16,
        energy_short: u16,
        timestamp_ns: f64,
        flags: u64,
    ) -> Self {
        Self {
            down_sample_factor: 1,
            energy,
            energy_short,
            flags,
            module,
            channel,
            timestamp_ns,
            ..Default::default()
        }
    }

    /// Serialized size of this event: fixed header plus waveform bytes
    pub fn serialized_size(&self) -> usize {
        EVENT_HEADER_SIZE + self.waveform.len() * WAVEFORM_SAMPLE_SIZE
    }

    /// Append the canonical wire representation to `buf`
    ///
    /// Fields are written in alphabetical order, little-endian. The
    /// waveformSize field is taken from the actual sample vector, never from
    /// a separately stored count.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.serialized_size());
        buf.push(self.analog_probe1_type);
        buf.push(self.analog_probe2_type);
        buf.push(self.channel);
        buf.push(self.digital_probe1_type);
        buf.push(self.digital_probe2_type);
        buf.push(self.digital_probe3_type);
        buf.push(self.digital_probe4_type);
        buf.push(self.down_sample_factor);
        buf.extend_from_slice(&self.energy.to_le_bytes());
        buf.extend_from_slice(&self.energy_short.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.push(self.module);
        buf.push(self.time_resolution);
        buf.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        buf.extend_from_slice(&(self.waveform.len() as u32).to_le_bytes());
        for sample in &self.waveform {
            buf.extend_from_slice(&sample.adc_value.to_le_bytes());
            buf.extend_from_slice(&sample.timestamp_ns.to_le_bytes());
        }
    }

    /// Decode one event from the start of `buf`
    ///
    /// Returns the event and the number of bytes consumed. Fails with
    /// `InvalidData` when fewer than 34 bytes are available or the declared
    /// waveform would overrun the buffer.
    pub fn decode(buf: &[u8]) -> PipelineResult<(Self, usize)> {
        if buf.len() < EVENT_HEADER_SIZE {
            return Err(PipelineError::invalid_data(format!(
                "event header needs {} bytes, got {}",
                EVENT_HEADER_SIZE,
                buf.len()
            )));
        }

        let mut event = EventData {
            analog_probe1_type: buf[0],
            analog_probe2_type: buf[1],
            channel: buf[2],
            digital_probe1_type: buf[3],
            digital_probe2_type: buf[4],
            digital_probe3_type: buf[5],
            digital_probe4_type: buf[6],
            down_sample_factor: buf[7],
            energy: u16::from_le_bytes([buf[8], buf[9]]),
            energy_short: u16::from_le_bytes([buf[10], buf[11]]),
            flags: u64::from_le_bytes(buf[12..20].try_into().expect("8-byte slice")),
            module: buf[20],
            time_resolution: buf[21],
            timestamp_ns: f64::from_le_bytes(buf[22..30].try_into().expect("8-byte slice")),
            waveform: Vec::new(),
        };

        let waveform_size =
            u32::from_le_bytes(buf[30..34].try_into().expect("4-byte slice")) as usize;
        let total = EVENT_HEADER_SIZE + waveform_size * WAVEFORM_SAMPLE_SIZE;
        if buf.len() < total {
            return Err(PipelineError::invalid_data(format!(
                "waveform of {} samples needs {} bytes, got {}",
                waveform_size,
                total,
                buf.len()
            )));
        }

        event.waveform.reserve(waveform_size);
        let mut offset = EVENT_HEADER_SIZE;
        for _ in 0..waveform_size {
            let adc = u16::from_le_bytes([buf[offset], buf[offset + 1]]);
            let ts = u64::from_le_bytes(
                buf[offset + 2..offset + 10].try_into().expect("8-byte slice"),
            );
            event.waveform.push(WaveformSample::new(adc, ts));
            offset += WAVEFORM_SAMPLE_SIZE;
        }

        Ok((event, total))
    }

    /// Check if pileup was detected
    #[inline]
    pub fn has_pileup(&self) -> bool {
        (self.flags & flags::FLAG_PILEUP) != 0
    }

    /// Check if the trigger was lost
    #[inline]
    pub fn has_trigger_lost(&self) -> bool {
        (self.flags & flags::FLAG_TRIGGER_LOST) != 0
    }

    /// Check if the signal saturated (over range)
    #[inline]
    pub fn has_over_range(&self) -> bool {
        (self.flags & flags::FLAG_OVER_RANGE) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(waveform_len: usize) -> EventData {
        let mut event = EventData::new(3, 17, 1000, 750, 123456789.5, flags::FLAG_PILEUP);
        event.analog_probe1_type = 1;
        event.digital_probe2_type = 4;
        event.time_resolution = 2;
        event.waveform = (0..waveform_len)
            .map(|i| WaveformSample::new(i as u16, 1000 + i as u64))
            .collect();
        event
    }

    #[test]
    fn serialized_size_matches_layout() {
        assert_eq!(sample_event(0).serialized_size(), 34);
        assert_eq!(sample_event(5).serialized_size(), 34 + 50);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let event = sample_event(7);
        let mut buf = Vec::new();
        event.encode_into(&mut buf);
        assert_eq!(buf.len(), event.serialized_size());

        let (decoded, consumed) = EventData::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, event);
    }

    #[test]
    fn waveform_size_field_is_authoritative() {
        let event = sample_event(3);
        let mut buf = Vec::new();
        event.encode_into(&mut buf);

        // waveformSize sits at offset 30 in the fixed header
        let on_wire = u32::from_le_bytes(buf[30..34].try_into().unwrap());
        assert_eq!(on_wire, 3);
    }

    #[test]
    fn decode_rejects_short_header() {
        let err = EventData::decode(&[0u8; 20]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));
    }

    #[test]
    fn decode_rejects_waveform_overrun() {
        let event = sample_event(4);
        let mut buf = Vec::new();
        event.encode_into(&mut buf);
        // Truncate inside the waveform section
        buf.truncate(EVENT_HEADER_SIZE + WAVEFORM_SAMPLE_SIZE);

        let err = EventData::decode(&buf).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidData(_)));
    }

    #[test]
    fn canonical_field_offsets() {
        let mut event = sample_event(0);
        event.energy = 0x1234;
        event.module = 0xAB;
        let mut buf = Vec::new();
        event.encode_into(&mut buf);

        assert_eq!(buf[8], 0x34); // energy, little-endian
        assert_eq!(buf[9], 0x12);
        assert_eq!(buf[20], 0xAB); // module
    }

    #[test]
    fn flag_helpers() {
        let event = EventData::new(0, 0, 0, 0, 0.0, flags::FLAG_PILEUP | flags::FLAG_OVER_RANGE);
        assert!(event.has_pileup());
        assert!(!event.has_trigger_lost());
        assert!(event.has_over_range());
    }
}
