use byteorder::{ByteOrder, LittleEndian};
use ifskit::block::frame_count;
use ifskit::checksum::checksum;
use ifskit::header::{CompressionKind, HEADER_FIXED_LEN};
use ifskit::transcode::{compress_file, decompress_file};
use ifskit::{
    compress_image, decompress_image, locator, merge, verify, BlockCodec, IfsError, LzoCodec,
    StartupHeader, TranscodeOptions,
};
use tempfile::{tempdir, NamedTempFile};

type NoProgress = fn(usize, usize);

/// Stores blocks verbatim followed by the LZO end-of-stream marker.
struct MarkerCodec;

impl BlockCodec for MarkerCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::Lzo }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, String> {
        let mut out = block.to_vec();
        out.extend([0x11, 0x00, 0x00]);
        Ok(out)
    }

    fn decompress(&self, block: &[u8], expected: usize) -> Result<Vec<u8>, String> {
        let body = block.strip_suffix(&[0x11, 0x00, 0x00]).ok_or("missing end marker")?;
        if body.len() > expected {
            return Err("block too long".into());
        }
        Ok(body.to_vec())
    }
}

/// Full blocks compress to 300 bytes of 0xAB, anything shorter to 360 bytes
/// of 0xCD.
struct ScriptedCodec;

impl BlockCodec for ScriptedCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::Lzo }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, String> {
        Ok(if block.len() == 65536 { vec![0xAB; 300] } else { vec![0xCD; 360] })
    }

    fn decompress(&self, _: &[u8], _: usize) -> Result<Vec<u8>, String> {
        Err("scripted codec cannot decompress".into())
    }
}

fn noise(len: usize, mut seed: u64) -> Vec<u8> {
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed >> 32) as u8
        })
        .collect()
}

/// Random text over a four-letter alphabet; LZO shrinks it well below the
/// u16 frame limit.
fn sample(len: usize, seed: u64) -> Vec<u8> {
    noise(len, seed).into_iter().map(|b| b"acgt"[(b & 3) as usize]).collect()
}

/// An uncompressed container with a 56-byte header.
fn container(startup: usize, payload: &[u8], stored: usize) -> Vec<u8> {
    let mut h = StartupHeader::new();
    h.header_size = 56;
    h.reserved = vec![0; 56 - HEADER_FIXED_LEN];
    h.flags1 = 0x08;
    h.startup_size = startup as u32;
    h.stored_size = stored as u32;
    h.imagefs_size = payload.len() as u32;
    let mut bytes = h.to_bytes().unwrap();
    bytes.resize(startup, 0x5A);
    bytes.extend_from_slice(payload);
    bytes
}

fn stored_word(buf: &[u8], at: usize) -> u32 {
    LittleEndian::read_u32(&buf[at..at + 4])
}

// ── Compress ────────────────────────────────────────────────────────────────

#[test]
fn two_block_stream_layout() {
    let input = container(64, &vec![7u8; 65536 + 1000], 2048);
    let image = compress_image(&input, &ScriptedCodec, &TranscodeOptions::default(), None::<&mut NoProgress>)
        .unwrap();
    let out = &image.bytes;

    assert_eq!(out.len(), 2048);
    assert_eq!(image.frames, 2);
    assert_eq!(&out[64..66], &[0x01, 0x2C]);
    assert!(out[66..366].iter().all(|&b| b == 0xAB));
    assert_eq!(&out[366..368], &[0x01, 0x68]);
    assert_eq!(image.stream_end, 728);
    // The image checksum word overlays bytes 721..725 of the second frame.
    assert!(out[368..721].iter().all(|&b| b == 0xCD));
    assert!(out[725..728].iter().all(|&b| b == 0xCD));
    assert!(out[728..2044].iter().all(|&b| b == 0));

    assert_eq!(checksum(&out[..60]).wrapping_add(stored_word(out, 60)), 0);
    assert_eq!(checksum(&out[..2044]).wrapping_add(stored_word(out, 2044)), 0);
}

#[test]
fn frame_count_matches_block_count() {
    let payload = sample(200_000, 0x1234_5678);
    let input = container(64, &payload, 260_000);
    let image = compress_image(&input, &LzoCodec::default(), &TranscodeOptions::default(), None::<&mut NoProgress>)
        .unwrap();
    assert_eq!(image.frames, frame_count(payload.len(), 65536));
    assert_eq!(image.frames, 4);
}

#[test]
fn compress_is_a_fixed_point_on_its_own_output() {
    let input = container(64, &noise(5000, 42), 8192);
    let opts = TranscodeOptions { block_size: 2048, ..Default::default() };

    let first = compress_image(&input, &MarkerCodec, &opts, None::<&mut NoProgress>).unwrap();
    let restored = decompress_image(&first.bytes, &MarkerCodec, &opts, None::<&mut NoProgress>).unwrap();
    let second = compress_image(&restored.bytes, &MarkerCodec, &opts, None::<&mut NoProgress>).unwrap();
    assert_eq!(first.bytes, second.bytes);
}

#[test]
fn stored_size_too_small_writes_nothing() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("image.ifs");
    let dst = dir.path().join("packed.ifs");
    std::fs::write(&src, container(64, &noise(4000, 3), 1024)).unwrap();

    let err = compress_file(&src, &dst, &MarkerCodec, &TranscodeOptions::default(), None::<&mut NoProgress>)
        .unwrap_err();
    assert!(matches!(err, IfsError::StoredSizeExceeded { stored_size: 1024, .. }));
    assert!(!dst.exists());
}

// ── Round trip ──────────────────────────────────────────────────────────────

#[test]
fn lzo_round_trip_differs_only_in_the_image_checksum_word() {
    let payload = sample(150_000, 0xDEAD_BEEF);
    let input = container(64, &payload, 200_000);
    let dir = tempdir().unwrap();
    let src = dir.path().join("image.ifs");
    let packed = dir.path().join("packed.ifs");
    let unpacked = dir.path().join("unpacked.ifs");
    std::fs::write(&src, &input).unwrap();

    let codec = LzoCodec::default();
    let opts = TranscodeOptions::default();
    let mut last = (0, 0);
    let mut record = |done: usize, total: usize| last = (done, total);
    compress_file(&src, &packed, &codec, &opts, Some(&mut record)).unwrap();
    assert_eq!(last, (input.len(), input.len()));

    let restored = decompress_file(&packed, &unpacked, &codec, &opts, None::<&mut NoProgress>).unwrap();
    assert_eq!(restored.frames, 3);
    assert_eq!(restored.filled, input.len());

    let out = std::fs::read(&unpacked).unwrap();
    assert_eq!(out.len(), input.len());
    let diffs: Vec<usize> = (64..out.len()).filter(|&i| out[i] != input[i]).collect();
    if let (Some(first), Some(last)) = (diffs.first(), diffs.last()) {
        assert!(last - first < 4, "differences spread over {first}..={last}");
        assert!(*first >= out.len() - 4);
    }
}

// ── Verification ────────────────────────────────────────────────────────────

#[test]
fn fresh_image_verifies_clean() {
    // Payloads 3000..3004 put the image checksum word in each of the four
    // byte lanes relative to startup_size.
    for payload in 3000..3004 {
        let input = container(64, &noise(payload, 9), 4096);
        let image = compress_image(&input, &MarkerCodec, &TranscodeOptions::default(), None::<&mut NoProgress>)
            .unwrap();

        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), &image.bytes).unwrap();
        let report = verify::verify_file(file.path()).unwrap();

        assert_eq!(report.offset, 0);
        assert_eq!(report.len, 4096);
        let image_sum = report.checksums.image.as_ref().unwrap();
        assert_eq!(image_sum.stored_at, image.stream_end - 7);
        assert!(report.checksums.all_valid(), "payload {payload}");
    }
}

#[test]
fn fresh_lzo_images_verify_clean_in_every_lane() {
    let codec = LzoCodec::default();
    let mut lanes = [false; 4];
    for k in 0..40 {
        let input = container(64, &sample(20_000 + k, 0x5EED + k as u64), 40_000);
        let image = compress_image(&input, &codec, &TranscodeOptions::default(), None::<&mut NoProgress>)
            .unwrap();
        let report = verify::verify_blob(&image.bytes).unwrap();
        let image_sum = report.checksums.image.as_ref().unwrap();
        assert_eq!(image_sum.stored_at, image.stream_end - 7, "payload {}", 20_000 + k);
        assert!(report.checksums.all_valid(), "payload {}", 20_000 + k);
        lanes[(image_sum.stored_at - 64) % 4] = true;
    }
    assert_eq!(lanes, [true; 4]);
}

#[test]
fn verification_reports_a_corrupted_image() {
    let input = container(64, &noise(3001, 11), 4096);
    let mut bytes = compress_image(&input, &MarkerCodec, &TranscodeOptions::default(), None::<&mut NoProgress>)
        .unwrap()
        .bytes;
    bytes[100] ^= 0xFF;

    let before = bytes.clone();
    let report = verify::verify_blob(&bytes).unwrap();
    assert_eq!(bytes, before);
    assert!(report.checksums.startup.valid);
    assert!(!report.checksums.overall.valid);
    assert!(!report.checksums.image.as_ref().unwrap().valid);
}

// ── Split / Merge ───────────────────────────────────────────────────────────

fn firmware_blob() -> Vec<u8> {
    let mut first = StartupHeader::new();
    first.stored_size = 700;
    let mut second = StartupHeader::new();
    second.stored_size = 512;

    let mut blob = noise(37, 1);
    blob.extend(first.to_bytes().unwrap());
    blob.extend(noise(700 - 256, 2));
    blob.extend(noise(93, 3));
    blob.extend(second.to_bytes().unwrap());
    blob.extend(noise(512 - 256, 4));
    blob.extend(noise(20, 5));
    blob
}

#[test]
fn split_then_merge_restores_the_blob() {
    let blob = firmware_blob();
    let dir = tempdir().unwrap();
    let src = dir.path().join("firmware.bin");
    let parts = dir.path().join("parts");
    let merged = dir.path().join("merged.bin");
    std::fs::write(&src, &blob).unwrap();

    let written = locator::split_file(&src, &parts).unwrap();
    let names: Vec<String> = written.iter().map(|(s, _)| s.file_name()).collect();
    assert_eq!(names, ["ifs0.bin", "ifs1.ifs", "ifs2.bin", "ifs2.ifs", "ifs3.bin"]);
    assert_eq!(std::fs::read(parts.join("ifs1.ifs")).unwrap().len(), 700);

    let size = merge::merge_dir(&parts, &merged).unwrap();
    assert_eq!(size, blob.len());
    assert_eq!(std::fs::read(&merged).unwrap(), blob);
}

#[test]
fn split_without_signature_writes_nothing() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("firmware.bin");
    let parts = dir.path().join("parts");
    std::fs::write(&src, vec![0u8; 4096]).unwrap();

    assert!(matches!(locator::split_file(&src, &parts), Err(IfsError::NoContainersFound)));
    assert!(!parts.exists());
}
