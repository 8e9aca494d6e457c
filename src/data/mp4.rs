//! Top-level ISO BMFF box inspection, used to verify that a remuxed MP4 is fast-start
//! (the `moov` index precedes the `mdat` sample data).

use std::io::{self, Read, Seek, SeekFrom};

/// Type and position of a top-level box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    pub offset: u64,
    pub size: u64,
}

/// Reads the headers of all top-level boxes without loading their payload.
///
/// A box with size 0 extends to the end of the file, size 1 means a 64 bit size follows the type.
pub fn read_top_level_boxes<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<BoxHeader>> {
    let len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut boxes = Vec::new();
    let mut offset = 0u64;
    while offset + 8 <= len {
        reader.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let mut size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let box_type = [header[4], header[5], header[6], header[7]];

        let header_len = if size == 1 {
            let mut large_size = [0u8; 8];
            reader.read_exact(&mut large_size)?;
            size = u64::from_be_bytes(large_size);
            16
        } else {
            if size == 0 {
                size = len - offset;
            }
            8
        };

        if size < header_len || offset.checked_add(size).is_none_or(|end| end > len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Invalid size {} for box '{}' at offset {}",
                    size,
                    String::from_utf8_lossy(&box_type),
                    offset
                ),
            ));
        }

        boxes.push(BoxHeader {
            box_type,
            offset,
            size,
        });
        offset += size;
    }

    Ok(boxes)
}

/// Returns true if the file has a `moov` box that comes before its first `mdat` box.
pub fn is_fast_start<R: Read + Seek>(reader: &mut R) -> io::Result<bool> {
    let boxes = read_top_level_boxes(reader)?;
    let moov = boxes.iter().position(|b| &b.box_type == b"moov");
    let mdat = boxes.iter().position(|b| &b.box_type == b"mdat");

    Ok(match (moov, mdat) {
        (Some(moov), Some(mdat)) => moov < mdat,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

#[cfg(test)]
pub mod tests {
    use std::io::Cursor;

    use super::{is_fast_start, read_top_level_boxes};

    pub fn mp4_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(payload.len() + 8);
        buf.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        buf.extend_from_slice(box_type);
        buf.extend_from_slice(payload);
        buf
    }

    /// A minimal file with the given top-level box order.
    pub fn mp4_with_order(order: &[&[u8; 4]]) -> Vec<u8> {
        order
            .iter()
            .flat_map(|t| mp4_box(t, &[0u8; 16]))
            .collect()
    }

    #[test]
    fn test_read_top_level_boxes() {
        let data = mp4_with_order(&[b"ftyp", b"moov", b"mdat"]);
        let boxes = read_top_level_boxes(&mut Cursor::new(data)).unwrap();
        let types = boxes.iter().map(|b| &b.box_type).collect::<Vec<_>>();
        assert_eq!(types, vec![b"ftyp", b"moov", b"mdat"]);
        assert_eq!(boxes[1].offset, 24);
        assert_eq!(boxes[2].size, 24);
    }

    #[test]
    fn test_fast_start_order() {
        let fast = mp4_with_order(&[b"ftyp", b"moov", b"free", b"mdat"]);
        assert!(is_fast_start(&mut Cursor::new(fast)).unwrap());

        let slow = mp4_with_order(&[b"ftyp", b"mdat", b"moov"]);
        assert!(!is_fast_start(&mut Cursor::new(slow)).unwrap());

        let no_index = mp4_with_order(&[b"ftyp", b"mdat"]);
        assert!(!is_fast_start(&mut Cursor::new(no_index)).unwrap());
    }

    #[test]
    fn test_large_and_open_ended_boxes() {
        let mut data = mp4_box(b"ftyp", b"isom");
        data.extend_from_slice(&mp4_box(b"moov", &[0u8; 8]));
        // 64 bit size header
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"free");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[0u8; 4]);
        // size 0 runs to the end of the file
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 32]);

        let boxes = read_top_level_boxes(&mut Cursor::new(data.clone())).unwrap();
        assert_eq!(boxes.len(), 4);
        assert_eq!(boxes[2].size, 20);
        assert_eq!(boxes[3].size, 40);
        assert!(is_fast_start(&mut Cursor::new(data)).unwrap());
    }

    #[test]
    fn test_truncated_box() {
        let mut data = mp4_box(b"ftyp", b"isom");
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        assert!(read_top_level_boxes(&mut Cursor::new(data)).is_err());
    }

    #[test]
    fn test_oversized_large_box() {
        let mut data = mp4_box(b"ftyp", b"isom");
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&u64::MAX.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);
        assert!(read_top_level_boxes(&mut Cursor::new(data.clone())).is_err());
        assert!(is_fast_start(&mut Cursor::new(data)).is_err());
    }
}
