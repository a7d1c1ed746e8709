use crate::{
    DecryptOptions, Error, Job, Result, Stage, normalize,
    session::{DecryptionSession, DecryptionTransport, TcpTransport},
};
use amdecrypt_mp4::{MuxTemplate, extract_song_file, write_m4a_file};
use log::{debug, info, warn};
use serde::Serialize;
use std::{fs, io, path::PathBuf};

/// Summary of one successful run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub samples: usize,
    /// Bytes sent to the peer.
    pub encrypted_bytes: u64,
    /// Bytes that were already in the clear.
    pub clear_bytes: u64,
    pub output_bytes: u64,
    pub codec: Option<String>,
    pub timescale: u32,
    /// Total duration in timescale units.
    pub duration: u64,
    pub normalized: bool,
    /// Pipeline runs it took, 1 without retries.
    pub attempts: u32,
}

/// Decrypt `input` into `output` with default options apart from the
/// endpoint and the normalizer.
pub fn decrypt(
    endpoint: &str,
    normalizer: &str,
    track_id: &str,
    key_uri: &str,
    input: &str,
    output: &str,
) -> Result<Report> {
    let options = DecryptOptions::default()
        .endpoint(endpoint)
        .normalizer(normalizer);
    let job = Job {
        track_id: track_id.to_owned(),
        key_uri: key_uri.to_owned(),
        input: PathBuf::from(input),
        output: PathBuf::from(output),
    };

    run(&options, &job, |_, _| ())
}

/// [`run`] on a blocking worker thread, for async hosts.
pub async fn decrypt_async(options: DecryptOptions, job: Job) -> Result<Report> {
    tokio::task::spawn_blocking(move || run(&options, &job, |_, _| ()))
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
}

/// Run the whole pipeline against a TCP peer. `progress` receives
/// `(samples done, samples total)`.
pub fn run<F: FnMut(usize, usize)>(
    options: &DecryptOptions,
    job: &Job,
    progress: F,
) -> Result<Report> {
    run_with(options, job, || TcpTransport::connect(options), progress)
}

/// Run the whole pipeline, opening a fresh transport with `connect` for
/// every attempt.
///
/// Transport failures re-run everything from extraction up to
/// `options.retries` more times. Other errors are returned right away.
pub fn run_with<T, C, F>(
    options: &DecryptOptions,
    job: &Job,
    mut connect: C,
    mut progress: F,
) -> Result<Report>
where
    T: DecryptionTransport,
    C: FnMut() -> Result<T>,
    F: FnMut(usize, usize),
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match attempt(options, job, &mut connect, &mut progress) {
            Ok(report) => return Ok(Report { attempts, ..report }),
            Err(e) if e.is_transport() && attempts <= options.retries => {
                warn!("attempt {attempts} of {} failed: {e}", options.retries + 1);
            }
            Err(e) => return Err(e),
        }
    }
}

fn attempt<T, C, F>(
    options: &DecryptOptions,
    job: &Job,
    connect: &mut C,
    progress: &mut F,
) -> Result<Report>
where
    T: DecryptionTransport,
    C: FnMut() -> Result<T>,
    F: FnMut(usize, usize),
{
    info!("Extracting samples from {}", job.input.display());
    let assets = extract_song_file(&job.input).map_err(|e| Error::from(e).at(Stage::Extract))?;

    if assets.samples.is_empty() {
        warn!("no samples found in {}", job.input.display());
    }

    let template = MuxTemplate::from_movie(&assets.movie_box);
    let codec = template.codec().map(|x| x.to_string());
    info!(
        "Found {} samples ({} bytes, codec {}, timescale {})",
        assets.samples.len(),
        assets.total_bytes(),
        codec.as_deref().unwrap_or("unknown"),
        template.timescale
    );

    let total = assets.samples.len();
    let plaintext = (|| -> Result<Vec<u8>> {
        let mut session = DecryptionSession::new(connect()?, &job.track_id, &job.key_uri)?;
        progress(0, total);
        let plaintext = session.decrypt_samples(&assets.samples, |done| progress(done, total))?;
        session.close()?;
        Ok(plaintext)
    })()
    .map_err(|e| e.at(Stage::Decrypt))?;

    let temp = job.temp_path();
    info!("Writing {}", temp.display());
    let layout = write_m4a_file(&temp, &assets.samples, &plaintext, &template)
        .map_err(|e| Error::from(e).at(Stage::Remux))?;
    debug!("{layout:?}");

    let (normalized, output_bytes) =
        normalize::finalize(&options.normalizer, &temp, &job.output, options.keep_temp)
            .and_then(|x| Ok((x, fs::metadata(&job.output)?.len())))
            .map_err(|e| e.at(Stage::Finalize))?;

    Ok(Report {
        samples: total,
        encrypted_bytes: assets.samples.iter().map(|x| x.encrypted_len() as u64).sum(),
        clear_bytes: assets.samples.iter().map(|x| x.clear_len() as u64).sum(),
        output_bytes,
        codec,
        timescale: template.timescale,
        duration: layout.duration,
        normalized,
        attempts: 1,
    })
}
