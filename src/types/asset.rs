use serde::{Deserialize, Serialize};

/// media type of a stored asset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    #[default]
    Unknown,
    ImageJpeg,
    ImagePng,
    ImageBmp,
    ImageGif,
    ImageWebp,
}

impl AssetType {
    /// detect the media type from leading magic bytes
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes {
            [0xff, 0xd8, 0xff, ..] => AssetType::ImageJpeg,
            [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, ..] => AssetType::ImagePng,
            [b'B', b'M', ..] => AssetType::ImageBmp,
            [b'G', b'I', b'F', b'8', ..] => AssetType::ImageGif,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => AssetType::ImageWebp,
            _ => AssetType::Unknown,
        }
    }

    /// file extension used when materializing the asset
    pub fn extension(&self) -> &'static str {
        match self {
            AssetType::Unknown => "bin",
            AssetType::ImageJpeg => "jpg",
            AssetType::ImagePng => "png",
            AssetType::ImageBmp => "bmp",
            AssetType::ImageGif => "gif",
            AssetType::ImageWebp => "webp",
        }
    }
}

/// per-asset attributes stored in the metadatas partition
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAttributes {
    pub asset_type: AssetType,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    #[serde(default)]
    pub byte_size: u64,
}

impl AssetAttributes {
    /// attributes for raw bytes; dimensions are read from png/jpeg/bmp/gif headers
    pub fn probe(bytes: &[u8]) -> Self {
        let asset_type = AssetType::sniff(bytes);
        let (width, height, channels) = match asset_type {
            AssetType::ImagePng => probe_png(bytes),
            AssetType::ImageJpeg => probe_jpeg(bytes),
            AssetType::ImageBmp => probe_bmp(bytes),
            AssetType::ImageGif => probe_gif(bytes),
            _ => None,
        }
        .unwrap_or((0, 0, 0));

        Self {
            asset_type,
            width,
            height,
            channels,
            byte_size: bytes.len() as u64,
        }
    }
}

fn be16(b: &[u8]) -> u32 {
    u16::from_be_bytes([b[0], b[1]]) as u32
}

fn probe_png(bytes: &[u8]) -> Option<(u32, u32, u32)> {
    // IHDR is always the first chunk
    let ihdr = bytes.get(16..26)?;
    let width = u32::from_be_bytes([ihdr[0], ihdr[1], ihdr[2], ihdr[3]]);
    let height = u32::from_be_bytes([ihdr[4], ihdr[5], ihdr[6], ihdr[7]]);
    let channels = match ihdr[9] {
        0 => 1,
        2 => 3,
        3 => 3,
        4 => 2,
        6 => 4,
        _ => 0,
    };
    Some((width, height, channels))
}

fn probe_jpeg(bytes: &[u8]) -> Option<(u32, u32, u32)> {
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xff {
            return None;
        }
        let marker = bytes[pos + 1];
        if marker == 0xff {
            pos += 1;
            continue;
        }
        let len = be16(&bytes[pos + 2..]) as usize;
        // SOF0..SOF15 minus DHT, JPG and DAC
        if (0xc0..=0xcf).contains(&marker) && !matches!(marker, 0xc4 | 0xc8 | 0xcc) {
            let sof = bytes.get(pos + 4..pos + 10)?;
            return Some((be16(&sof[3..]), be16(&sof[1..]), sof[5] as u32));
        }
        pos += 2 + len;
    }
    None
}

fn probe_bmp(bytes: &[u8]) -> Option<(u32, u32, u32)> {
    let h = bytes.get(18..30)?;
    let width = i32::from_le_bytes([h[0], h[1], h[2], h[3]]).unsigned_abs();
    let height = i32::from_le_bytes([h[4], h[5], h[6], h[7]]).unsigned_abs();
    let bpp = u16::from_le_bytes([h[10], h[11]]) as u32;
    Some((width, height, (bpp / 8).max(1)))
}

fn probe_gif(bytes: &[u8]) -> Option<(u32, u32, u32)> {
    let h = bytes.get(6..10)?;
    let width = u16::from_le_bytes([h[0], h[1]]) as u32;
    let height = u16::from_le_bytes([h[2], h[3]]) as u32;
    Some((width, height, 3))
}
