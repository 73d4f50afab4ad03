//! Frame boundary detection for push-mode decoding.
//!
//! The decode stage hands raw file bytes to the decoder in arbitrary chunks, so frame
//! boundaries have to be found in the byte stream itself:
//! - ID3v2 tags (skipped, they may hold large cover art)
//! - MPEG audio Layer III frame headers
//! - AAC ADTS frame headers

const MPA_HEADER_LEN: usize = 4;
const ADTS_MIN_HEADER_LEN: usize = 7;
const ID3_HEADER_LEN: usize = 10;

const MPEG1_L3_KBPS: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const MPEG2_L3_KBPS: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const ADTS_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

/// Samples per channel in one AAC-LC frame.
pub(crate) const AAC_SAMPLES_PER_FRAME: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MpegVersion {
    V1,
    V2,
    V25,
}

/// Parsed MPEG audio Layer III frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MpaHeader {
    pub version: MpegVersion,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_len: usize,
    pub samples_per_frame: usize,
}

/// Parsed ADTS frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AdtsHeader {
    pub sample_rate: u32,
    pub channels: u16,
    pub header_len: usize,
    pub frame_len: usize,
    /// Two-byte AudioSpecificConfig equivalent to this header.
    pub audio_specific_config: [u8; 2],
}

/// Outcome of checking the start of a buffer for an ID3v2 tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Id3Probe {
    /// No tag at the start of the buffer.
    Absent,
    /// Possibly a tag, but fewer than ten bytes are available.
    Incomplete,
    /// A tag of the given total length (header, body and optional footer).
    Tag(usize),
}

pub(crate) fn probe_id3v2(input: &[u8]) -> Id3Probe {
    let magic = b"ID3";
    let n = input.len().min(magic.len());
    if input[..n] != magic[..n] || input.is_empty() {
        return Id3Probe::Absent;
    }
    if input.len() < ID3_HEADER_LEN {
        return Id3Probe::Incomplete;
    }
    let size_bytes = &input[6..10];
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return Id3Probe::Absent;
    }
    let body = size_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(*b));
    let footer = if input[5] & 0x10 != 0 { ID3_HEADER_LEN } else { 0 };
    Id3Probe::Tag(ID3_HEADER_LEN + body + footer)
}

pub(crate) fn parse_mpa_header(bytes: &[u8]) -> Option<MpaHeader> {
    if bytes.len() < MPA_HEADER_LEN || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = match (bytes[1] >> 3) & 0x03 {
        0 => MpegVersion::V25,
        2 => MpegVersion::V2,
        3 => MpegVersion::V1,
        _ => return None,
    };
    // Layer III only.
    if (bytes[1] >> 1) & 0x03 != 0x01 {
        return None;
    }
    let bitrate_idx = usize::from(bytes[2] >> 4);
    if bitrate_idx == 0 || bitrate_idx == 15 {
        return None;
    }
    let rate_idx = usize::from((bytes[2] >> 2) & 0x03);
    if rate_idx == 3 {
        return None;
    }
    let padding = usize::from((bytes[2] >> 1) & 0x01);
    let channels = if bytes[3] >> 6 == 0x03 { 1 } else { 2 };

    let (kbps, sample_rate, coefficient, samples_per_frame) = match version {
        MpegVersion::V1 => (
            MPEG1_L3_KBPS[bitrate_idx],
            [44_100, 48_000, 32_000][rate_idx],
            144_000,
            1152,
        ),
        MpegVersion::V2 => (
            MPEG2_L3_KBPS[bitrate_idx],
            [22_050, 24_000, 16_000][rate_idx],
            72_000,
            576,
        ),
        MpegVersion::V25 => (
            MPEG2_L3_KBPS[bitrate_idx],
            [11_025, 12_000, 8_000][rate_idx],
            72_000,
            576,
        ),
    };
    let frame_len = (coefficient * kbps / sample_rate) as usize + padding;

    Some(MpaHeader {
        version,
        sample_rate,
        channels,
        frame_len,
        samples_per_frame,
    })
}

pub(crate) fn parse_adts_header(bytes: &[u8]) -> Option<AdtsHeader> {
    if bytes.len() < ADTS_MIN_HEADER_LEN || bytes[0] != 0xFF || bytes[1] & 0xF6 != 0xF0 {
        return None;
    }
    let protection_absent = bytes[1] & 0x01 == 1;
    let object_type = (bytes[2] >> 6) + 1;
    let rate_idx = (bytes[2] >> 2) & 0x0F;
    let sample_rate = *ADTS_SAMPLE_RATES.get(usize::from(rate_idx))?;
    let channel_config = ((bytes[2] & 0x01) << 2) | (bytes[3] >> 6);
    if channel_config == 0 {
        return None;
    }
    let frame_len = (usize::from(bytes[3] & 0x03) << 11)
        | (usize::from(bytes[4]) << 3)
        | usize::from(bytes[5] >> 5);
    let header_len = if protection_absent { 7 } else { 9 };
    if frame_len <= header_len {
        return None;
    }
    let channels = if channel_config == 7 {
        8
    } else {
        u16::from(channel_config)
    };
    let asc = (u16::from(object_type) << 11)
        | (u16::from(rate_idx) << 7)
        | (u16::from(channel_config) << 3);

    Some(AdtsHeader {
        sample_rate,
        channels,
        header_len,
        frame_len,
        audio_specific_config: asc.to_be_bytes(),
    })
}

/// Offset of the first position in `input` where `is_header` accepts a header.
pub(crate) fn find_sync(input: &[u8], is_header: impl Fn(&[u8]) -> bool) -> Option<usize> {
    (0..input.len())
        .filter(|&i| input[i] == 0xFF)
        .find(|&i| is_header(&input[i..]))
}
