//! Voice adapter integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use interject::voice::{Endpoint, Endpointer, SAMPLE_RATE, f32_to_i16, samples_to_wav};

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

fn endpointer(timeout_secs: u64, limit_secs: u64) -> Endpointer {
    Endpointer::new(
        0.03,
        SAMPLE_RATE,
        Duration::from_secs(timeout_secs),
        Duration::from_secs(limit_secs),
    )
}

#[test]
fn test_silence_times_out() {
    let mut ep = endpointer(1, 5);

    assert_eq!(ep.push(&generate_silence(0.5)), Endpoint::Waiting);
    assert_eq!(ep.push(&generate_silence(0.6)), Endpoint::TimedOut);
    assert!(!ep.has_speech());

    // Terminal: more speech changes nothing
    assert_eq!(ep.push(&generate_sine_samples(440.0, 0.5, 0.3)), Endpoint::TimedOut);
}

#[test]
fn test_phrase_completes_after_trailing_silence() {
    let mut ep = endpointer(2, 5);

    let first = generate_sine_samples(440.0, 0.5, 0.3);
    let second = generate_sine_samples(440.0, 0.3, 0.3);
    let trailing = generate_silence(0.6);

    assert_eq!(ep.push(&generate_silence(0.2)), Endpoint::Waiting);
    assert_eq!(ep.push(&first), Endpoint::Speaking);
    assert_eq!(ep.push(&second), Endpoint::Speaking);
    assert_eq!(ep.push(&trailing), Endpoint::Complete);

    // Leading silence is dropped, trailing silence kept
    let speech = ep.take_speech();
    assert_eq!(speech.len(), first.len() + second.len() + trailing.len());
    assert!(!ep.has_speech());
}

#[test]
fn test_phrase_limit_cuts_off_speech() {
    let mut ep = endpointer(2, 1);

    assert_eq!(ep.push(&generate_sine_samples(440.0, 0.6, 0.3)), Endpoint::Speaking);
    assert_eq!(ep.push(&generate_sine_samples(440.0, 0.6, 0.3)), Endpoint::Complete);
    assert!(ep.has_speech());
}

#[test]
fn test_short_noise_returns_to_waiting() {
    let mut ep = endpointer(5, 5);

    // 0.1s click then long silence: too short to be a phrase
    assert_eq!(ep.push(&generate_sine_samples(440.0, 0.1, 0.3)), Endpoint::Speaking);
    assert_eq!(ep.push(&generate_silence(1.1)), Endpoint::Waiting);
    assert!(!ep.has_speech());
}

#[test]
fn test_short_noise_counts_toward_timeout() {
    let mut ep = endpointer(1, 5);

    assert_eq!(ep.push(&generate_silence(0.5)), Endpoint::Waiting);
    assert_eq!(ep.push(&generate_sine_samples(440.0, 0.1, 0.3)), Endpoint::Speaking);
    assert_eq!(ep.push(&generate_silence(1.1)), Endpoint::TimedOut);
}

#[test]
fn test_max_duration() {
    let ep = endpointer(6, 6);
    assert_eq!(ep.max_duration(), Duration::from_secs(12));
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");
    assert!(wav_data.len() > 44);
}

#[test]
fn test_wav_preserves_samples() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();

    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    let expected: Vec<i16> = original_samples.iter().map(|&s| f32_to_i16(s)).collect();
    assert_eq!(read_samples, expected);
}

#[test]
fn test_f32_to_i16_clamps() {
    assert_eq!(f32_to_i16(0.0), 0);
    assert_eq!(f32_to_i16(1.0), 32767);
    assert_eq!(f32_to_i16(2.0), 32767);
    assert_eq!(f32_to_i16(-2.0), -32768);
}
