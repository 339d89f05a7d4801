//! S7 frame construction and parsing
//!
//! Frames are ISO-on-TCP: a TPKT header (RFC 1006), a COTP header and the S7
//! PDU. Only the handful of telegrams needed for byte access to one data block
//! are built here: connection request, setup communication, read var and
//! write var.

use crate::core::transport::TransportError;

/// TPKT header length
pub const TPKT_HEADER_LEN: usize = 4;
/// TPKT plus COTP data header
pub const ISO_HEADER_LEN: usize = 7;
/// Area code of data blocks; LOGO! exposes its VM as DB 1
pub const AREA_DB: u8 = 0x84;
/// PDU length asked for during setup communication
pub const DEFAULT_PDU_LENGTH: u16 = 480;

/// Bytes of a read var response that are not payload
const READ_OVERHEAD: u16 = 18;
/// Bytes of a write var request that are not payload
const WRITE_OVERHEAD: u16 = 28;

const COTP_CONNECTION_CONFIRM: u8 = 0xD0;
const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const FUNC_READ_VAR: u8 = 0x04;
const FUNC_WRITE_VAR: u8 = 0x05;
const FUNC_SETUP_COMMUNICATION: u8 = 0xF0;
const TRANSPORT_SIZE_BYTE: u8 = 0x02;
const DATA_TRANSPORT_SIZE_BYTES: u8 = 0x04;
const ITEM_SUCCESS: u8 = 0xFF;

/// TPKT header (RFC 1006)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpktHeader {
    /// Total packet length including this header
    pub length: u16,
}

impl TpktHeader {
    pub fn to_bytes(self) -> [u8; TPKT_HEADER_LEN] {
        let [hi, lo] = self.length.to_be_bytes();
        [0x03, 0x00, hi, lo]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TransportError> {
        if data.len() < TPKT_HEADER_LEN {
            return Err(TransportError::ProtocolError(
                "TPKT header too short".to_string(),
            ));
        }
        if data[0] != 0x03 {
            return Err(TransportError::ProtocolError(format!(
                "Invalid TPKT version: {}",
                data[0]
            )));
        }
        let length = u16::from_be_bytes([data[2], data[3]]);
        if (length as usize) < ISO_HEADER_LEN {
            return Err(TransportError::ProtocolError(format!(
                "Invalid TPKT length: {}",
                length
            )));
        }
        Ok(Self { length })
    }

    /// Number of bytes following the header
    pub fn payload_len(self) -> usize {
        self.length as usize - TPKT_HEADER_LEN
    }
}

/// Largest payload of one read var request for a negotiated PDU length
pub fn max_read_chunk(pdu_length: u16) -> usize {
    pdu_length.saturating_sub(READ_OVERHEAD) as usize
}

/// Largest payload of one write var request for a negotiated PDU length
pub fn max_write_chunk(pdu_length: u16) -> usize {
    pdu_length.saturating_sub(WRITE_OVERHEAD) as usize
}

fn with_tpkt(body: &[u8]) -> Vec<u8> {
    let header = TpktHeader {
        length: (TPKT_HEADER_LEN + body.len()) as u16,
    };
    let mut frame = Vec::with_capacity(TPKT_HEADER_LEN + body.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(body);
    frame
}

/// COTP connection request carrying the local and remote TSAP
pub fn connection_request(local_tsap: u16, remote_tsap: u16) -> Vec<u8> {
    let [lt_hi, lt_lo] = local_tsap.to_be_bytes();
    let [rt_hi, rt_lo] = remote_tsap.to_be_bytes();
    with_tpkt(&[
        0x11, // length indicator
        0xE0, // CR
        0x00, 0x00, // destination reference
        0x00, 0x01, // source reference
        0x00, // class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, lt_hi, lt_lo, // calling TSAP
        0xC2, 0x02, rt_hi, rt_lo, // called TSAP
    ])
}

/// Validate the COTP connection confirm
pub fn check_connection_confirm(frame: &[u8]) -> Result<(), TransportError> {
    match frame.get(5) {
        Some(&COTP_CONNECTION_CONFIRM) => Ok(()),
        Some(other) => Err(TransportError::ConnectionFailed(format!(
            "ISO connection refused (PDU type 0x{:02X})",
            other
        ))),
        None => Err(TransportError::ProtocolError(
            "ISO connection confirm too short".to_string(),
        )),
    }
}

fn job_header(pdu_ref: u16, param_len: u16, data_len: u16) -> [u8; 13] {
    let [ref_hi, ref_lo] = pdu_ref.to_be_bytes();
    let [p_hi, p_lo] = param_len.to_be_bytes();
    let [d_hi, d_lo] = data_len.to_be_bytes();
    [
        0x02, 0xF0, 0x80, // COTP data, last unit
        S7_PROTOCOL_ID,
        ROSCTR_JOB,
        0x00, 0x00, // redundancy id
        ref_hi, ref_lo,
        p_hi, p_lo,
        d_hi, d_lo,
    ]
}

/// S7 setup communication asking for `pdu_length`
pub fn setup_communication(pdu_ref: u16, pdu_length: u16) -> Vec<u8> {
    let [pdu_hi, pdu_lo] = pdu_length.to_be_bytes();
    let mut body = job_header(pdu_ref, 8, 0).to_vec();
    body.extend_from_slice(&[
        FUNC_SETUP_COMMUNICATION,
        0x00,
        0x00, 0x01, // max AmQ calling
        0x00, 0x01, // max AmQ called
        pdu_hi, pdu_lo,
    ]);
    with_tpkt(&body)
}

/// Negotiated PDU length from the setup communication answer
pub fn parse_setup_response(frame: &[u8]) -> Result<u16, TransportError> {
    check_header_error(frame)?;
    if frame.len() < 27 {
        return Err(TransportError::ProtocolError(format!(
            "Setup communication answer too short: {} bytes",
            frame.len()
        )));
    }
    let pdu_length = u16::from_be_bytes([frame[25], frame[26]]);
    if pdu_length <= WRITE_OVERHEAD {
        return Err(TransportError::ProtocolError(format!(
            "Negotiated PDU length too small: {}",
            pdu_length
        )));
    }
    Ok(pdu_length)
}

fn item_address(db_number: u16, start: u32, count: u16) -> [u8; 12] {
    let [c_hi, c_lo] = count.to_be_bytes();
    let [db_hi, db_lo] = db_number.to_be_bytes();
    let bit_address = start * 8;
    [
        0x12, // variable specification
        0x0A, // length of following address
        0x10, // syntax id: S7ANY
        TRANSPORT_SIZE_BYTE,
        c_hi, c_lo,
        db_hi, db_lo,
        AREA_DB,
        (bit_address >> 16) as u8,
        (bit_address >> 8) as u8,
        bit_address as u8,
    ]
}

/// Read var request for `count` bytes of a data block at `start`
pub fn read_request(pdu_ref: u16, db_number: u16, start: u32, count: u16) -> Vec<u8> {
    let mut body = job_header(pdu_ref, 14, 0).to_vec();
    body.extend_from_slice(&[FUNC_READ_VAR, 0x01]);
    body.extend_from_slice(&item_address(db_number, start, count));
    with_tpkt(&body)
}

/// Payload of a read var answer
pub fn parse_read_response(frame: &[u8], expected: usize) -> Result<&[u8], TransportError> {
    check_header_error(frame)?;
    check_item_result(frame)?;
    let data_end = 25 + expected;
    if frame.len() < data_end {
        return Err(TransportError::ProtocolError(format!(
            "Read answer carries {} bytes, expected {}",
            frame.len().saturating_sub(25),
            expected
        )));
    }
    Ok(&frame[25..data_end])
}

/// Write var request storing `data` into a data block at `start`
pub fn write_request(pdu_ref: u16, db_number: u16, start: u32, data: &[u8]) -> Vec<u8> {
    let count = data.len() as u16;
    let [bits_hi, bits_lo] = (count * 8).to_be_bytes();
    let mut body = job_header(pdu_ref, 14, 4 + count).to_vec();
    body.extend_from_slice(&[FUNC_WRITE_VAR, 0x01]);
    body.extend_from_slice(&item_address(db_number, start, count));
    body.extend_from_slice(&[0x00, DATA_TRANSPORT_SIZE_BYTES, bits_hi, bits_lo]);
    body.extend_from_slice(data);
    with_tpkt(&body)
}

/// Validate a write var answer
pub fn check_write_response(frame: &[u8]) -> Result<(), TransportError> {
    check_header_error(frame)?;
    check_item_result(frame)
}

fn check_header_error(frame: &[u8]) -> Result<(), TransportError> {
    if frame.len() < 19 || frame[7] != S7_PROTOCOL_ID {
        return Err(TransportError::ProtocolError(format!(
            "Invalid S7 answer ({} bytes)",
            frame.len()
        )));
    }
    let (class, code) = (frame[17], frame[18]);
    if class != 0 || code != 0 {
        return Err(TransportError::DeviceError {
            code: 0x0080_0000 | (u32::from(class) << 8) | u32::from(code),
            text: format!("S7 header error class 0x{:02X} code 0x{:02X}", class, code),
        });
    }
    Ok(())
}

fn check_item_result(frame: &[u8]) -> Result<(), TransportError> {
    let Some(&result) = frame.get(21) else {
        return Err(TransportError::ProtocolError(
            "S7 answer without item result".to_string(),
        ));
    };
    if result == ITEM_SUCCESS {
        return Ok(());
    }
    let (code, text) = match result {
        0x01 => (0x0080_0000, "Hardware fault"),
        0x03 => (0x00D0_0000, "Access denied"),
        0x05 => (0x0090_0000, "Address out of range"),
        0x06 => (0x00A0_0000, "Data type not supported"),
        0x07 => (0x00B0_0000, "Data type inconsistent"),
        0x0A => (0x00C0_0000, "Item not available"),
        _ => (0x0080_0000, "Invalid PLC answer"),
    };
    Err(TransportError::DeviceError {
        code,
        text: format!("{} (item result 0x{:02X})", text, result),
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_connection_request_layout() {
        let frame = connection_request(0x0200, 0x0200);
        assert_eq!(frame.len(), 22);
        assert_eq!(&frame[..4], &[0x03, 0x00, 0x00, 0x16]);
        assert_eq!(frame[5], 0xE0);
        assert_eq!(&frame[14..18], &[0xC1, 0x02, 0x02, 0x00]);
        assert_eq!(&frame[18..22], &[0xC2, 0x02, 0x02, 0x00]);
    }

    #[test]
    fn test_setup_communication_layout() {
        let frame = setup_communication(0x0400, DEFAULT_PDU_LENGTH);
        assert_eq!(
            frame,
            vec![
                0x03, 0x00, 0x00, 0x19, 0x02, 0xF0, 0x80, 0x32, 0x01, 0x00, 0x00, 0x04, 0x00,
                0x00, 0x08, 0x00, 0x00, 0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x01, 0xE0,
            ]
        );
    }

    #[test]
    fn test_read_request_layout() {
        let frame = read_request(0x0500, 1, 17, 2);
        assert_eq!(frame.len(), 31);
        assert_eq!(&frame[..4], &[0x03, 0x00, 0x00, 0x1F]);
        assert_eq!(frame[17], 0x04);
        // count, db number, area, bit address 17 * 8 = 136
        assert_eq!(&frame[23..31], &[0x00, 0x02, 0x00, 0x01, 0x84, 0x00, 0x00, 0x88]);
    }

    #[test]
    fn test_write_request_layout() {
        let frame = write_request(1, 1, 205, &[222]);
        assert_eq!(frame.len(), 36);
        assert_eq!(frame[17], 0x05);
        // data length = 4 + 1
        assert_eq!(&frame[15..17], &[0x00, 0x05]);
        assert_eq!(&frame[31..36], &[0x00, 0x04, 0x00, 0x08, 222]);
    }

    fn ack_frame(item_result: u8, data: &[u8]) -> Vec<u8> {
        let mut frame = vec![
            0x03, 0x00, 0x00, 0x00, 0x02, 0xF0, 0x80, 0x32, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00,
            0x02, 0x00, 0x00, 0x00, 0x00, 0x04, 0x01, item_result, 0x04, 0x00, 0x00,
        ];
        frame.extend_from_slice(data);
        let len = frame.len() as u16;
        frame[2..4].copy_from_slice(&len.to_be_bytes());
        frame
    }

    #[test]
    fn test_parse_read_response() {
        let frame = ack_frame(0xFF, &[0x05, 0x39]);
        assert_eq!(parse_read_response(&frame, 2).unwrap(), &[0x05, 0x39]);
        assert!(parse_read_response(&frame, 3).is_err());
    }

    #[test]
    fn test_item_error_is_device_error() {
        let frame = ack_frame(0x05, &[]);
        match parse_read_response(&frame, 1) {
            Err(TransportError::DeviceError { code, text }) => {
                assert_eq!(code, 0x0090_0000);
                assert!(text.contains("Address out of range"));
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tpkt_header() {
        let header = TpktHeader::from_bytes(&[0x03, 0x00, 0x00, 0x1F]).unwrap();
        assert_eq!(header.payload_len(), 27);
        assert!(TpktHeader::from_bytes(&[0x04, 0x00, 0x00, 0x1F]).is_err());
        assert!(TpktHeader::from_bytes(&[0x03, 0x00, 0x00, 0x03]).is_err());
    }

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(max_read_chunk(240), 222);
        assert_eq!(max_write_chunk(240), 212);
    }
}
