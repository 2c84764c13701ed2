//! Encoder correctness: roundtrips across levels and data shapes, plus
//! cross-validation against the flate2 reference decoder.

use std::io::Read;

use pzip_deflate::{deflate, inflate, FlateWriter};

fn patterned_data(len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    for i in 0..len {
        data.push(((i as u32 * 31 + 7) % 251) as u8);
    }
    data
}

fn mixed_data(bytes: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes);
    let mut state: u32 = 0x1234_5678;
    while out.len() < bytes {
        match (out.len() / 4096) % 3 {
            0 => out.extend_from_slice(b"pzip-parallel-deflate-"),
            1 => out.extend_from_slice(b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            _ => {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                out.push((state >> 24) as u8);
            }
        }
    }
    out.truncate(bytes);
    out
}

fn pseudo_random(bytes: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes);
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    while out.len() < bytes {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(bytes);
    out
}

fn flate2_inflate(data: &[u8]) -> Vec<u8> {
    let mut dec = flate2::read::DeflateDecoder::new(data);
    let mut out = Vec::new();
    dec.read_to_end(&mut out).expect("reference inflate failed");
    out
}

#[test]
fn roundtrip_every_level() {
    let data = mixed_data(300_000);
    for level in 0..=9u8 {
        let compressed = deflate(&data, level).unwrap();
        assert_eq!(inflate(&compressed).unwrap(), data, "own inflate, level {}", level);
        assert_eq!(flate2_inflate(&compressed), data, "flate2, level {}", level);
    }
}

#[test]
fn roundtrip_boundary_sizes() {
    // Around the window and stored-block boundaries.
    for len in [
        0usize, 1, 12, 13, 31, 32, 33, 127, 128, 129, 1024, 65534, 65535, 65536, 65537, 131071,
    ] {
        let data = patterned_data(len);
        for level in [1u8, 4] {
            let compressed = deflate(&data, level).unwrap();
            assert_eq!(
                flate2_inflate(&compressed),
                data,
                "len {} level {}",
                len,
                level
            );
        }
    }
}

#[test]
fn roundtrip_incompressible() {
    let data = pseudo_random(256 * 1024);
    for level in [1u8, 6, 9] {
        let compressed = deflate(&data, level).unwrap();
        // Near-random data must not grow much: stored blocks cap overhead.
        assert!(compressed.len() < data.len() + data.len() / 64 + 64);
        assert_eq!(flate2_inflate(&compressed), data, "level {}", level);
    }
}

#[test]
fn roundtrip_highly_repetitive() {
    let data = vec![0xABu8; 5 * 1024 * 1024];
    let compressed = deflate(&data, 1).unwrap();
    assert!(compressed.len() < 50 * 1024);
    assert_eq!(inflate(&compressed).unwrap(), data);
}

#[test]
fn roundtrip_text_all_levels_cross_checked() {
    let text = "It was the best of times, it was the worst of times. ".repeat(4000);
    for level in 1..=9u8 {
        let compressed = deflate(text.as_bytes(), level).unwrap();
        assert!(compressed.len() < text.len() / 4, "level {}", level);
        assert_eq!(flate2_inflate(&compressed), text.as_bytes(), "level {}", level);
    }
}

#[test]
fn streaming_chunk_sizes_do_not_change_output() {
    let data = mixed_data(500_000);
    let oneshot = deflate(&data, 4).unwrap();

    for chunk in [1usize, 7, 4096, 65535, 65536, 100_000] {
        let mut w = FlateWriter::new(Vec::new(), 4);
        for part in data.chunks(chunk) {
            w.write(part).unwrap();
        }
        let out = w.finish().unwrap();
        assert_eq!(out, oneshot, "chunk size {}", chunk);
    }
}

#[test]
fn reset_reuses_encoder_cleanly() {
    let a = mixed_data(200_000);
    let b = patterned_data(150_000);

    let mut w = FlateWriter::new(Vec::new(), 1);
    w.write(&a).unwrap();
    w.close().unwrap();

    w.reset(Vec::new());
    w.write(&b).unwrap();
    let out = w.finish().unwrap();
    assert_eq!(flate2_inflate(&out), b);
}

#[test]
fn flate2_streams_decode_with_own_inflate() {
    // The decode side must accept a third-party encoder's output.
    let data = mixed_data(200_000);
    for level in [flate2::Compression::fast(), flate2::Compression::best()] {
        let mut enc = flate2::read::DeflateEncoder::new(&data[..], level);
        let mut compressed = Vec::new();
        enc.read_to_end(&mut compressed).unwrap();
        assert_eq!(inflate(&compressed).unwrap(), data);
    }
}
