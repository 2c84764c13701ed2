//! End-to-end archive/extract roundtrips on real directory trees.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use pzip_zip::header::{FLAG_UTF8, METHOD_STORE};
use pzip_zip::{Archiver, ArchiverOptions, Extractor, ExtractorOptions, ZipReader};

fn archive_paths(archive: &Path, paths: &[PathBuf], options: ArchiverOptions) {
    let archiver = Archiver::new(archive, options);
    archiver.archive(paths).unwrap();
    archiver.close().unwrap();
}

fn extract_archive(archive: &Path, out: &Path) {
    let extractor = Extractor::new(out, ExtractorOptions::default());
    extractor.extract(archive).unwrap();
}

#[test]
fn roundtrip_small_tree() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("b.txt"), "hello\n").unwrap();

    let archive = dir.path().join("a.zip");
    archive_paths(&archive, &[root.clone()], ArchiverOptions::default());

    let out = dir.path().join("out");
    extract_archive(&archive, &out);

    assert!(out.join("a").is_dir());
    assert_eq!(fs::read_to_string(out.join("a/b.txt")).unwrap(), "hello\n");

    // Mtimes survive within DOS resolution.
    let src_mtime = fs::metadata(root.join("b.txt")).unwrap().modified().unwrap();
    let dst_mtime = fs::metadata(out.join("a/b.txt")).unwrap().modified().unwrap();
    let diff = src_mtime
        .duration_since(dst_mtime)
        .unwrap_or_else(|e| e.duration());
    assert!(diff <= Duration::from_secs(2), "mtime diff {:?}", diff);
}

#[test]
fn roundtrip_incompressible_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("noise.bin");

    // Pseudo-random 5 MiB; near-incompressible.
    let mut state = 0x2545F4914F6CDD1Du64;
    let mut data = Vec::with_capacity(5 << 20);
    while data.len() < 5 << 20 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        data.extend_from_slice(&state.to_le_bytes());
    }
    data.truncate(5 << 20);
    fs::write(&src, &data).unwrap();

    let archive = dir.path().join("noise.zip");
    archive_paths(&archive, &[src.clone()], ArchiverOptions::default());

    // Random data stays near its original size.
    let archive_len = fs::metadata(&archive).unwrap().len();
    assert!(archive_len >= (5 << 20) - 64 * 1024);

    let out = dir.path().join("out");
    extract_archive(&archive, &out);
    assert_eq!(fs::read(out.join("noise.bin")).unwrap(), data);
}

#[test]
fn roundtrip_zero_file_compresses() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("zeros.bin");
    fs::write(&src, vec![0u8; 5 << 20]).unwrap();

    let archive = dir.path().join("zeros.zip");
    archive_paths(
        &archive,
        &[src.clone()],
        ArchiverOptions {
            level: 1,
            ..Default::default()
        },
    );

    assert!(fs::metadata(&archive).unwrap().len() < 50 * 1024);

    let out = dir.path().join("out");
    extract_archive(&archive, &out);
    assert_eq!(fs::read(out.join("zeros.bin")).unwrap(), vec![0u8; 5 << 20]);
}

#[cfg(unix)]
#[test]
fn roundtrip_symlink_member() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("tree");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("target"), "t").unwrap();
    std::os::unix::fs::symlink("../target", root.join("link")).unwrap();

    let archive = dir.path().join("tree.zip");
    archive_paths(&archive, &[root.clone()], ArchiverOptions::default());

    // The member stores the target string with method STORE.
    let reader = ZipReader::open(&archive).unwrap();
    let link = reader
        .entries()
        .iter()
        .find(|e| e.header.name == "tree/link")
        .expect("symlink member present");
    assert_eq!(link.header.method, METHOD_STORE);
    assert!(link.header.is_symlink());
    assert_eq!(reader.read_decompressed(link).unwrap(), b"../target");
    drop(reader);

    let out = dir.path().join("out");
    extract_archive(&archive, &out);
    let restored = fs::read_link(out.join("tree/link")).unwrap();
    assert_eq!(restored, Path::new("../target"));
}

#[test]
fn roundtrip_many_small_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("many");
    fs::create_dir(&root).unwrap();

    let count = 1000;
    for i in 0..count {
        fs::write(
            root.join(format!("file-{:04}.txt", i)),
            format!("file number {} contents\n", i).repeat(1 + i % 40),
        )
        .unwrap();
    }

    let archive = dir.path().join("many.zip");
    archive_paths(
        &archive,
        &[root.clone()],
        ArchiverOptions {
            concurrency: 8,
            ..Default::default()
        },
    );

    let reader = ZipReader::open(&archive).unwrap();
    // 1000 files plus the root directory member.
    assert_eq!(reader.entries().len(), count + 1);

    // All members decode with valid CRCs.
    for entry in reader.entries() {
        if !entry.is_directory() {
            reader.read_decompressed(entry).unwrap();
        }
    }
    drop(reader);

    let out = dir.path().join("out");
    extract_archive(&archive, &out);
    for i in (0..count).step_by(97) {
        let name = format!("file-{:04}.txt", i);
        assert_eq!(
            fs::read(out.join("many").join(&name)).unwrap(),
            fs::read(root.join(&name)).unwrap()
        );
    }
}

#[test]
fn utf8_names_set_flag_and_survive() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("named");
    fs::create_dir(&root).unwrap();
    let name = "\u{65e5}\u{672c}\u{8a9e}.txt";
    fs::write(root.join(name), "multibyte").unwrap();

    let archive = dir.path().join("named.zip");
    archive_paths(&archive, &[root.clone()], ArchiverOptions::default());

    let reader = ZipReader::open(&archive).unwrap();
    let entry = reader
        .entries()
        .iter()
        .find(|e| e.header.name.ends_with(".txt"))
        .unwrap();
    assert_ne!(entry.header.flags & FLAG_UTF8, 0);
    assert_eq!(entry.header.name, format!("named/{}", name));

    let out = dir.path().join("out");
    extract_archive(&archive, &out);
    assert_eq!(
        fs::read_to_string(out.join("named").join(name)).unwrap(),
        "multibyte"
    );
}

#[test]
fn archive_skips_itself() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("self");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("data.txt"), "payload").unwrap();

    // The archive lives inside the tree being archived.
    let archive = root.join("self.zip");
    archive_paths(&archive, &[root.clone()], ArchiverOptions::default());

    let reader = ZipReader::open(&archive).unwrap();
    assert!(reader
        .entries()
        .iter()
        .all(|e| !e.header.name.ends_with("self.zip")));
    assert!(reader
        .entries()
        .iter()
        .any(|e| e.header.name == "self/data.txt"));
}

#[test]
fn empty_file_member_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("empty.txt");
    fs::write(&src, b"").unwrap();

    let archive = dir.path().join("empty.zip");
    archive_paths(&archive, &[src.clone()], ArchiverOptions::default());

    let reader = ZipReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 1);
    let entry = &reader.entries()[0];
    assert_eq!(entry.header.uncompressed_size, 0);
    assert_eq!(entry.header.crc32, 0);
    assert!(reader.read_decompressed(entry).unwrap().is_empty());

    let out = dir.path().join("out");
    extract_archive(&archive, &out);
    assert_eq!(fs::metadata(out.join("empty.txt")).unwrap().len(), 0);
}

#[test]
fn spilled_member_roundtrips() {
    // Compressed output above 2 MiB forces the spill file path.
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big.bin");

    // Level 0 (stored inside DEFLATE) makes compressed size exceed input.
    let mut data = Vec::with_capacity(3 << 20);
    let mut state = 1u32;
    while data.len() < 3 << 20 {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        data.extend_from_slice(&state.to_le_bytes());
    }
    fs::write(&src, &data).unwrap();

    let archive = dir.path().join("big.zip");
    archive_paths(
        &archive,
        &[src.clone()],
        ArchiverOptions {
            level: 0,
            ..Default::default()
        },
    );

    let out = dir.path().join("out");
    extract_archive(&archive, &out);
    assert_eq!(fs::read(out.join("big.bin")).unwrap(), data);
}

#[test]
fn rearchiving_extracted_tree_matches() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("orig");
    fs::create_dir_all(root.join("nested/deeper")).unwrap();
    fs::write(root.join("top.txt"), "top level").unwrap();
    fs::write(root.join("nested/mid.txt"), "middle".repeat(1000)).unwrap();
    fs::write(root.join("nested/deeper/leaf.bin"), vec![9u8; 70_000]).unwrap();

    let first = dir.path().join("first.zip");
    archive_paths(&first, &[root.clone()], ArchiverOptions::default());

    let out = dir.path().join("out");
    extract_archive(&first, &out);

    let second = dir.path().join("second.zip");
    archive_paths(
        &second,
        &[out.join("orig")],
        ArchiverOptions::default(),
    );

    // Same member set and content, order-independently.
    let collect = |path: &Path| -> Vec<(String, Vec<u8>)> {
        let reader = ZipReader::open(path).unwrap();
        let mut members: Vec<_> = reader
            .entries()
            .iter()
            .map(|e| {
                let data = if e.is_directory() {
                    Vec::new()
                } else {
                    reader.read_decompressed(e).unwrap()
                };
                (e.header.name.clone(), data)
            })
            .collect();
        members.sort();
        members
    };
    assert_eq!(collect(&first), collect(&second));
}

#[test]
fn progress_fires_once_per_member() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("p");
    fs::create_dir(&root).unwrap();
    for i in 0..10 {
        fs::write(root.join(format!("{}.txt", i)), "x").unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_cb = Arc::clone(&calls);
    let archive = dir.path().join("p.zip");
    archive_paths(
        &archive,
        &[root],
        ArchiverOptions {
            progress: Some(Arc::new(move |_done, _total| {
                calls_in_cb.fetch_add(1, Ordering::Relaxed);
            })),
            ..Default::default()
        },
    );

    // 10 files + root dir = 11 members.
    assert_eq!(calls.load(Ordering::Relaxed), 11);
}

#[test]
fn no_overwrite_skips_existing() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("keep.txt");
    fs::write(&src, "new contents").unwrap();

    let archive = dir.path().join("keep.zip");
    archive_paths(&archive, &[src.clone()], ArchiverOptions::default());

    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    fs::write(out.join("keep.txt"), "old contents").unwrap();

    let extractor = Extractor::new(
        &out,
        ExtractorOptions {
            overwrite: false,
            ..Default::default()
        },
    );
    extractor.extract(&archive).unwrap();

    assert_eq!(
        fs::read_to_string(out.join("keep.txt")).unwrap(),
        "old contents"
    );
}

#[test]
fn archive_is_readable_by_flate2_per_member() {
    // Independent decode of each member's raw stream with the reference
    // inflater confirms we emit standard DEFLATE inside standard framing.
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("doc.txt");
    let content = "interoperability check ".repeat(20_000);
    fs::write(&src, &content).unwrap();

    let archive = dir.path().join("doc.zip");
    archive_paths(&archive, &[src], ArchiverOptions::default());

    let reader = ZipReader::open(&archive).unwrap();
    let entry = &reader.entries()[0];
    let raw = reader.read_compressed(entry).unwrap();

    let mut decoder = flate2::read::DeflateDecoder::new(&raw[..]);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, content.as_bytes());
}

#[test]
fn missing_input_fails_whole_job() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("x.zip");
    let archiver = Archiver::new(&archive, ArchiverOptions::default());
    let err = archiver
        .archive(&[dir.path().join("does-not-exist")])
        .unwrap_err();
    assert!(matches!(err, pzip_core::PzipError::NotFound { .. }));
    archiver.close().unwrap();
}

#[test]
fn extractor_mtime_restored() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("dated.txt");
    fs::write(&src, "dated").unwrap();
    // Backdate the source by a day.
    let old = SystemTime::now() - Duration::from_secs(86_400);
    let f = fs::File::options().write(true).open(&src).unwrap();
    f.set_modified(old).unwrap();
    drop(f);

    let archive = dir.path().join("dated.zip");
    archive_paths(&archive, &[src], ArchiverOptions::default());

    let out = dir.path().join("out");
    extract_archive(&archive, &out);

    let restored = fs::metadata(out.join("dated.txt")).unwrap().modified().unwrap();
    let diff = restored
        .duration_since(old)
        .unwrap_or_else(|e| e.duration());
    assert!(diff <= Duration::from_secs(2), "mtime diff {:?}", diff);
}
