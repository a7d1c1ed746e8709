use amdecrypt_mp4::{
    BoxKind, MuxTemplate, SampleTables, boxes::SampleEntry, extract_song, extract_song_file,
    find_box, scan, write_m4a_file,
};
use std::{error::Error, fs, path::PathBuf, sync::LazyLock};

static OUTPUT_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../target/amdecrypt-mp4-remux");
    fs::create_dir_all(&dir).ok();
    dir
});

fn bx(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    data.extend_from_slice(fourcc);
    data.extend_from_slice(payload);
    data
}

fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|x| x.to_be_bytes()).collect()
}

/// `moov` with an `enca` entry wrapping `alac` and a media timescale.
fn movie(timescale: u32) -> Vec<u8> {
    let mut entry = vec![0; 6];
    entry.extend_from_slice(&[0, 1]);
    entry.extend_from_slice(&[0; 8]);
    entry.extend_from_slice(&words(&[(2 << 16) | 16, 0, timescale << 16]));
    entry.extend(bx(b"alac", &[0; 28]));
    entry.extend(bx(b"sinf", &bx(b"frma", b"alac")));

    let mut stsd = words(&[0, 1]);
    stsd.extend(bx(b"enca", &entry));

    let mut mdhd = words(&[0, 0, 0, timescale, 0]);
    mdhd.extend_from_slice(&[0x55, 0xC4, 0, 0]);

    let stbl = bx(b"stbl", &bx(b"stsd", &stsd));
    let minf = bx(b"minf", &stbl);
    let mut mdia = bx(b"mdhd", &mdhd);
    mdia.extend(minf);

    bx(b"moov", &bx(b"trak", &bx(b"mdia", &mdia)))
}

/// One `moof`/`mdat` pair. Sample bytes are `seed, seed + 1, ...`.
fn fragment(description_index: u32, samples: &[(u32, u32)], seed: u8) -> Vec<u8> {
    let tfhd = words(&[0x02, 1, description_index]);

    let mut trun = words(&[0x300, samples.len() as u32]);
    for (size, duration) in samples {
        trun.extend(words(&[*duration, *size]));
    }

    let mut traf = bx(b"tfhd", &tfhd);
    traf.extend(bx(b"trun", &trun));

    let total = samples.iter().map(|(size, _)| *size as usize).sum::<usize>();
    let media = (0..total).map(|x| seed.wrapping_add(x as u8)).collect::<Vec<_>>();

    let mut data = bx(b"moof", &bx(b"traf", &traf));
    data.extend(bx(b"mdat", &media));
    data
}

fn song(fragments: &[(u32, Vec<(u32, u32)>)]) -> Vec<u8> {
    let mut data = bx(b"ftyp", b"M4A \0\0\0\0M4A mp42isom");
    data.extend(movie(44100));

    for (i, (index, samples)) in fragments.iter().enumerate() {
        data.extend(fragment(*index, samples, i as u8 * 64));
    }

    data
}

macro_rules! remux {
    ($test_name: ident, $fragments: expr) => {
        #[test]
        fn $test_name() -> Result<(), Box<dyn Error>> {
            let fragments: Vec<(u32, Vec<(u32, u32)>)> = $fragments;
            let input = song(&fragments);
            let input_path = OUTPUT_DIR.join(concat!(stringify!($test_name), ".mp4"));
            let output_path = OUTPUT_DIR.join(concat!(stringify!($test_name), ".m4a"));
            fs::write(&input_path, &input)?;

            let assets = extract_song_file(&input_path)?;
            let expected_sizes = fragments
                .iter()
                .flat_map(|(_, x)| x.iter().map(|(size, _)| *size))
                .collect::<Vec<_>>();
            let expected_durations = fragments
                .iter()
                .flat_map(|(_, x)| x.iter().map(|(_, duration)| *duration))
                .collect::<Vec<_>>();

            let media = assets
                .samples
                .iter()
                .flat_map(|x| x.data.iter().copied())
                .collect::<Vec<_>>();
            let template = MuxTemplate::from_movie(&assets.movie_box);
            let layout = write_m4a_file(&output_path, &assets.samples, &media, &template)?;

            let output = fs::read(&output_path)?;
            let tables = SampleTables::parse(&output)?;

            assert_eq!(tables.sample_sizes, expected_sizes);
            assert_eq!(tables.durations(), expected_durations);
            assert_eq!(tables.chunk_offsets, vec![layout.mdat_payload_offset]);
            assert_eq!(
                &output[layout.mdat_payload_offset as usize..],
                &media[..]
            );
            assert_eq!(template.timescale, 44100);
            assert_eq!(template.codec().map(|x| x.to_string()), Some("alac".to_owned()));

            // the muxed file extracts nothing, it has no fragments
            assert!(extract_song(&output).samples.is_empty());
            Ok(())
        }
    };
}

remux!(single_fragment, vec![(1, vec![(32, 1024), (17, 1024), (5, 1024)])]);
remux!(
    key_change,
    vec![
        (1, vec![(16, 1024), (16, 1024)]),
        (2, vec![(100, 1024), (3, 512)]),
        (2, vec![(48, 2048)]),
    ]
);
remux!(
    varying_durations,
    vec![(1, vec![(10, 1024), (10, 1024), (10, 1024), (10, 2048), (10, 2048)])]
);

#[test]
fn run_length_encoded_durations() -> Result<(), Box<dyn Error>> {
    let input = song(&[(1, vec![(10, 1024), (10, 1024), (10, 1024), (10, 2048), (10, 2048)])]);
    let assets = extract_song(&input);
    let media = vec![0; 50];
    let output = OUTPUT_DIR.join("run_length_encoded_durations.m4a");

    write_m4a_file(
        &output,
        &assets.samples,
        &media,
        &MuxTemplate::from_movie(&assets.movie_box),
    )?;
    let tables = SampleTables::parse(&fs::read(output)?)?;

    assert_eq!(tables.time_to_sample, vec![(3, 1024), (2, 2048)]);
    assert_eq!(tables.sample_to_chunk, vec![(1, 5, 1)]);
    Ok(())
}

#[test]
fn description_indices_follow_tfhd() {
    let input = song(&[
        (1, vec![(16, 1024)]),
        (2, vec![(16, 1024), (16, 1024)]),
        (0, vec![(16, 1024)]),
    ]);
    let indices = extract_song(&input)
        .samples
        .iter()
        .map(|x| x.description_index)
        .collect::<Vec<_>>();

    assert_eq!(indices, vec![0, 1, 1, 0]);
}

#[test]
fn sample_description_is_reused() -> Result<(), Box<dyn Error>> {
    let input = song(&[(1, vec![(16, 1024)])]);
    let assets = extract_song(&input);
    let template = MuxTemplate::from_movie(&assets.movie_box);
    let output = OUTPUT_DIR.join("sample_description_is_reused.m4a");

    write_m4a_file(&output, &assets.samples, &vec![0; 16], &template)?;
    let output = fs::read(output)?;

    let stsd = find_box(&output, &[b"moov", b"trak", b"mdia", b"minf", b"stbl", b"stsd"])
        .ok_or("stsd missing")?;
    let entry = SampleEntry::parse(stsd)?;

    assert!(entry.is_protected());
    assert_eq!(entry.codec().to_string(), "alac");
    assert_eq!(Some(&stsd[..]), template.sample_description.as_deref().map(|x| &x[8..]));
    Ok(())
}

#[test]
fn zero_sized_box_ends_top_level_scan() {
    let mut input = song(&[(1, vec![(16, 1024)])]);
    let kept = scan(&input).boxes.len();

    // "free" claiming the rest of the file, followed by a real fragment
    input.extend_from_slice(&0u32.to_be_bytes());
    input.extend_from_slice(b"free");
    input.extend(fragment(1, &[(16, 1024)], 0));

    let top = scan(&input);
    assert_eq!(top.boxes.len(), kept + 1);
    assert_eq!(
        top.boxes.last().map(|x| x.kind()),
        Some(BoxKind::Other(b"free".into()))
    );
    assert!(top.truncation.is_none());
    assert_eq!(extract_song(&input).samples.len(), 1);
}

#[test]
fn largesize_mdat_is_read() {
    let mut input = bx(b"ftyp", b"M4A \0\0\0\0");
    let mut traf = bx(b"tfhd", &words(&[0x10, 1, 4]));
    traf.extend(bx(b"trun", &words(&[0, 2])));
    input.extend(bx(b"moof", &bx(b"traf", &traf)));
    input.extend(words(&[1]));
    input.extend_from_slice(b"mdat");
    input.extend((24u64).to_be_bytes());
    input.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

    let assets = extract_song(&input);
    assert_eq!(
        assets.samples.iter().map(|x| x.data.clone()).collect::<Vec<_>>(),
        vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]
    );
}
