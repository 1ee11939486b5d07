//! Incremental MAVLink frame decoder and v1 frame encoder.
//!
//! Inbound bytes arrive in arbitrary chunks from the serial line and may be
//! corrupted. The decoder buffers them, scans for a frame header, and only
//! consumes bytes once a whole checksum-valid frame is present. A candidate
//! header that fails validation costs exactly one discarded byte, so a noisy
//! stream always makes forward progress.
//!
//! Frame layouts, little-endian fields:
//!
//! ```text
//! v1: FE len seq sysid compid msgid payload[len] crc_lo crc_hi
//! v2: FD len incompat compat seq sysid compid msgid[3] payload[len] crc_lo crc_hi [sig 13]
//! ```

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BytesMut};

use super::crc_extra;

/// v1 frame header marker.
pub const STX_V1: u8 = 0xFE;
/// v2 frame header marker.
pub const STX_V2: u8 = 0xFD;

const V1_OVERHEAD: usize = 8;
const V2_OVERHEAD: usize = 12;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// Headerless garbage beyond this size is trimmed down to [`TRIM_KEEP`].
const TRIM_THRESHOLD: usize = 1024;
const TRIM_KEEP: usize = 512;

/// One validated frame: addressing header plus raw payload. Payload decoding
/// into typed messages happens in [`super::messages`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderStats {
    pub frames: u64,
    pub bad_frames: u64,
    pub bytes_discarded: u64,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(TRIM_THRESHOLD),
            stats: DecoderStats::default(),
        }
    }

    /// Append freshly read bytes to the working buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next checksum-valid frame, or `None` when the buffer holds
    /// no complete frame yet. Garbage in front of a valid frame is consumed;
    /// an incomplete frame tail is left untouched for the next read.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        loop {
            // Scan to the earliest plausible header.
            match self.buf.iter().position(|&b| b == STX_V1 || b == STX_V2) {
                Some(0) => {}
                Some(n) => {
                    self.stats.bytes_discarded += n as u64;
                    self.buf.advance(n);
                }
                None => {
                    // Pure garbage; bound the buffer and wait for more data.
                    if self.buf.len() > TRIM_THRESHOLD {
                        let cut = self.buf.len() - TRIM_KEEP;
                        self.stats.bytes_discarded += cut as u64;
                        self.buf.advance(cut);
                    }
                    return None;
                }
            }

            match self.try_frame_at_start() {
                Step::Complete(frame, consumed) => {
                    self.stats.frames += 1;
                    self.buf.advance(consumed);
                    return Some(frame);
                }
                Step::NeedMore => return None,
                Step::Invalid => {
                    // Not a real frame: sacrifice one byte and rescan.
                    self.stats.bad_frames += 1;
                    self.stats.bytes_discarded += 1;
                    self.buf.advance(1);
                }
            }
        }
    }

    /// Validate the candidate frame at buffer position 0.
    fn try_frame_at_start(&self) -> Step {
        let buf = &self.buf;
        let v2 = buf[0] == STX_V2;
        let overhead = if v2 { V2_OVERHEAD } else { V1_OVERHEAD };
        if buf.len() < overhead {
            return Step::NeedMore;
        }

        let payload_len = buf[1] as usize;
        let signed = v2 && buf[2] & INCOMPAT_FLAG_SIGNED != 0;
        let total = overhead + payload_len + if signed { SIGNATURE_LEN } else { 0 };
        if buf.len() < total {
            return Step::NeedMore;
        }

        let (seq, sysid, compid, msgid, payload_at) = if v2 {
            let msgid = u32::from(buf[7]) | u32::from(buf[8]) << 8 | u32::from(buf[9]) << 16;
            (buf[4], buf[5], buf[6], msgid, 10)
        } else {
            (buf[2], buf[3], buf[4], u32::from(buf[5]), 6)
        };

        // An id we have no CRC seed for cannot be validated; treat the header
        // as a false positive rather than trusting its length field.
        let extra = match crc_extra(msgid) {
            Some(extra) => extra,
            None => return Step::Invalid,
        };

        let crc_at = payload_at + payload_len;
        let mut crc = crc16::State::<crc16::MCRF4XX>::new();
        crc.update(&buf[1..crc_at]);
        crc.update(&[extra]);
        if crc.get() != LittleEndian::read_u16(&buf[crc_at..crc_at + 2]) {
            return Step::Invalid;
        }

        Step::Complete(
            RawFrame {
                sequence: seq,
                system_id: sysid,
                component_id: compid,
                message_id: msgid,
                payload: buf[payload_at..crc_at].to_vec(),
            },
            total,
        )
    }
}

enum Step {
    Complete(RawFrame, usize),
    NeedMore,
    Invalid,
}

/// Serialize a v1 frame around an already-encoded payload.
pub fn encode_v1(
    sequence: u8,
    system_id: u8,
    component_id: u8,
    message_id: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(V1_OVERHEAD + payload.len());
    out.push(STX_V1);
    out.push(payload.len() as u8);
    out.push(sequence);
    out.push(system_id);
    out.push(component_id);
    out.push(message_id);
    out.extend_from_slice(payload);

    let mut crc = crc16::State::<crc16::MCRF4XX>::new();
    crc.update(&out[1..]);
    crc.update(&[crc_extra(u32::from(message_id)).unwrap_or(0)]);
    let mut crc_bytes = [0u8; 2];
    LittleEndian::write_u16(&mut crc_bytes, crc.get());
    out.extend_from_slice(&crc_bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::msg_id;

    fn heartbeat_frame(seq: u8) -> Vec<u8> {
        // custom_mode=0, type=2 (quad), autopilot=3, base_mode=0x80, status=4, version=3
        let payload = [0, 0, 0, 0, 2, 3, 0x80, 4, 3];
        encode_v1(seq, 1, 1, msg_id::HEARTBEAT as u8, &payload)
    }

    #[test]
    fn decodes_single_frame() {
        let mut dec = FrameDecoder::new();
        dec.push(&heartbeat_frame(7));
        let frame = dec.next_frame().expect("frame");
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.system_id, 1);
        assert_eq!(frame.message_id, msg_id::HEARTBEAT);
        assert_eq!(frame.payload.len(), 9);
        assert!(dec.next_frame().is_none());
    }

    #[test]
    fn incremental_feed_matches_bulk_feed() {
        // Garbage (including a fake header), frame, garbage, frame, dangling header.
        let mut stream = vec![0x00, 0xFE, 0x13, 0x37];
        stream.extend(heartbeat_frame(1));
        stream.extend([0x13, 0x88, 0xAB]);
        stream.extend(heartbeat_frame(2));
        stream.extend([0xFE, 0x02]);

        let mut bulk = FrameDecoder::new();
        bulk.push(&stream);
        let mut expected = Vec::new();
        while let Some(f) = bulk.next_frame() {
            expected.push(f);
        }
        assert_eq!(
            expected.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let mut trickle = FrameDecoder::new();
        let mut got = Vec::new();
        for byte in &stream {
            trickle.push(&[*byte]);
            while let Some(f) = trickle.next_frame() {
                got.push(f);
            }
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn corrupt_checksum_is_dropped_without_blocking_next_frame() {
        let mut bad = heartbeat_frame(1);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let mut dec = FrameDecoder::new();
        dec.push(&bad);
        dec.push(&heartbeat_frame(2));

        let frame = dec.next_frame().expect("valid frame after corrupt one");
        assert_eq!(frame.sequence, 2);
        assert!(dec.next_frame().is_none());
        assert!(dec.stats().bad_frames > 0);
    }

    #[test]
    fn waits_for_rest_of_partial_frame() {
        let frame = heartbeat_frame(9);
        let mut dec = FrameDecoder::new();
        dec.push(&frame[..5]);
        assert!(dec.next_frame().is_none());
        assert_eq!(dec.buffered(), 5);
        dec.push(&frame[5..]);
        assert_eq!(dec.next_frame().expect("frame").sequence, 9);
    }

    #[test]
    fn headerless_garbage_is_trimmed() {
        let mut dec = FrameDecoder::new();
        dec.push(&vec![0x42u8; 2000]);
        assert!(dec.next_frame().is_none());
        assert_eq!(dec.buffered(), 512);

        // Still resynchronizes on a frame arriving after the garbage.
        dec.push(&heartbeat_frame(3));
        assert_eq!(dec.next_frame().expect("frame").sequence, 3);
    }

    #[test]
    fn unknown_message_id_does_not_eat_following_frame() {
        // A fake frame with an id outside the checksum table, then a real one.
        let mut dec = FrameDecoder::new();
        dec.push(&[STX_V1, 3, 0, 1, 1, 0xEE, 1, 2, 3, 0xAA, 0xBB]);
        dec.push(&heartbeat_frame(4));
        assert_eq!(dec.next_frame().expect("frame").sequence, 4);
    }

    #[test]
    fn decodes_v2_frame() {
        // Hand-build a v2 heartbeat: same payload, 3-byte message id.
        let payload = [1, 0, 0, 0, 2, 3, 0x80, 4, 3];
        let mut frame = vec![STX_V2, payload.len() as u8, 0, 0, 5, 1, 1, 0, 0, 0];
        frame.extend_from_slice(&payload);
        let mut crc = crc16::State::<crc16::MCRF4XX>::new();
        crc.update(&frame[1..]);
        crc.update(&[crc_extra(msg_id::HEARTBEAT).unwrap()]);
        let mut crc_bytes = [0u8; 2];
        LittleEndian::write_u16(&mut crc_bytes, crc.get());
        frame.extend_from_slice(&crc_bytes);

        let mut dec = FrameDecoder::new();
        dec.push(&frame);
        let decoded = dec.next_frame().expect("v2 frame");
        assert_eq!(decoded.sequence, 5);
        assert_eq!(decoded.message_id, msg_id::HEARTBEAT);
        assert_eq!(decoded.payload, payload);
    }
}
