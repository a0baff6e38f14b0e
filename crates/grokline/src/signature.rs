// Copyright 2026 Grokline Contributors
// SPDX-License-Identifier: Apache-2.0

//! `x-statsig-id` computation.
//!
//! The page derives the header from the verification token, one row of the
//! loading animation's SVG path, and a numeric table read out of a transform
//! script. The animation row is "played" to a frame chosen by the token and
//! the resulting colour and rotation matrix are hex-encoded into the hashed
//! message. Everything here is pure: the only impure inputs (clock and salt
//! byte) come in through [`SignatureStamp`].

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{GrokError, GrokResult, Phase};
use crate::transport::Method;
use crate::types::SigningContext;

/// Epoch the signed timestamp counts from (2023-05-01T07:00:00Z).
const STAMP_EPOCH: u64 = 1_682_924_400;

const HASH_SALT: &str = "obfiowerehiring";

/// Animation length in frames.
const TOTAL_TIME: f64 = 4096.0;

/// Characters of the SVG path before the first curve segment.
const SVG_PREFIX_LEN: usize = 9;

/// Trailing byte of the signed payload.
const PAYLOAD_VERSION: u8 = 3;

/// Minimum values in an animation row: two colours, a rotation, four curve points.
const MIN_ROW_LEN: usize = 11;

/// Time and salt inputs of one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureStamp {
    /// Seconds since [`STAMP_EPOCH`].
    pub seconds: u32,
    pub salt: u8,
}

impl SignatureStamp {
    /// Current time and a random salt.
    pub fn now() -> Self {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(STAMP_EPOCH);
        Self {
            seconds: unix.saturating_sub(STAMP_EPOCH) as u32,
            salt: rand::random(),
        }
    }
}

/// Everything the header depends on besides the stamp.
#[derive(Debug, Clone, Copy)]
pub struct SignatureInput<'a> {
    pub path: &'a str,
    pub method: &'a str,
    pub verification_token: &'a str,
    pub svg_path: &'a str,
    pub numbers: &'a [usize],
}

/// Compute the header value. Same input and stamp always give the same value.
pub fn generate(input: &SignatureInput<'_>, stamp: SignatureStamp) -> GrokResult<String> {
    let key = STANDARD.decode(input.verification_token).map_err(|e| {
        GrokError::parsing(Phase::Signing, format!("verification token is not base64: {e}"))
    })?;
    let animation = animation_key(&key, input.svg_path, input.numbers)?;

    let message = format!(
        "{}!{}!{}{HASH_SALT}{animation}",
        input.method, input.path, stamp.seconds
    );
    let digest = Sha256::digest(message.as_bytes());

    let mut payload = Vec::with_capacity(key.len() + 21);
    payload.extend_from_slice(&key);
    payload.extend_from_slice(&stamp.seconds.to_le_bytes());
    payload.extend_from_slice(&digest[..16]);
    payload.push(PAYLOAD_VERSION);

    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(stamp.salt);
    out.extend(payload.iter().map(|b| b ^ stamp.salt));

    Ok(STANDARD_NO_PAD.encode(out))
}

/// The animation string for a decoded token.
pub fn animation_key(key: &[u8], svg_path: &str, numbers: &[usize]) -> GrokResult<String> {
    let key_at = |index: usize| {
        key.get(index).copied().ok_or_else(|| {
            GrokError::parsing(
                Phase::Signing,
                format!("transform index {index} outside {}-byte token", key.len()),
            )
        })
    };

    let (&row_index, frame_indices) = numbers
        .split_first()
        .ok_or_else(|| GrokError::parsing(Phase::Signing, "empty transform table"))?;

    let row_index = (key_at(row_index)? % 16) as usize;

    let mut frame_time = 1.0;
    for &index in frame_indices {
        frame_time *= f64::from(key_at(index)? % 16);
    }
    let frame_time = js_round(frame_time / 10.0) * 10.0;

    let rows = svg_rows(svg_path)?;
    let row = rows.get(row_index).ok_or_else(|| {
        GrokError::parsing(
            Phase::Signing,
            format!("animation row {row_index} missing ({} rows)", rows.len()),
        )
    })?;

    animate(row, frame_time / TOTAL_TIME)
}

/// Split an SVG path into rows of integers, one per curve segment.
fn svg_rows(svg_path: &str) -> GrokResult<Vec<Vec<f64>>> {
    let body = svg_path
        .get(SVG_PREFIX_LEN..)
        .ok_or_else(|| GrokError::parsing(Phase::Signing, "SVG path too short"))?;

    Ok(body
        .split('C')
        .map(|segment| {
            segment
                .split(|c: char| !c.is_ascii_digit())
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse::<f64>().ok())
                .collect()
        })
        .collect())
}

fn animate(row: &[f64], target_time: f64) -> GrokResult<String> {
    if row.len() < MIN_ROW_LEN {
        return Err(GrokError::parsing(
            Phase::Signing,
            format!("animation row has {} values, need {MIN_ROW_LEN}", row.len()),
        ));
    }

    let from_color = [row[0], row[1], row[2], 1.0];
    let to_color = [row[3], row[4], row[5], 1.0];
    let to_rotation = solve(row[6], 60.0, 360.0, true);

    let curves: Vec<f64> = row[7..]
        .iter()
        .enumerate()
        .map(|(i, &v)| solve(v, if i % 2 == 1 { -1.0 } else { 0.0 }, 1.0, false))
        .collect();
    let progress = Cubic::new(&curves).value(target_time);

    let color: Vec<f64> = from_color
        .iter()
        .zip(to_color.iter())
        .map(|(&a, &b)| interpolate(a, b, progress).max(0.0))
        .collect();
    let rotation = interpolate(0.0, to_rotation, progress);

    let mut parts: Vec<String> = color[..3]
        .iter()
        .map(|c| format!("{:x}", c.round_ties_even() as i64))
        .collect();

    for value in rotation_matrix(rotation) {
        let hex = float_to_hex(round2(value).abs());
        parts.push(if hex.starts_with('.') {
            format!("0{hex}").to_lowercase()
        } else if hex.is_empty() {
            "0".to_string()
        } else {
            hex
        });
    }
    parts.push("0".to_string());
    parts.push("0".to_string());

    Ok(parts.concat().replace(['.', '-'], ""))
}

/// Scale a byte-range value into `[min, max]`.
fn solve(value: f64, min: f64, max: f64, floor: bool) -> f64 {
    let result = value * (max - min) / 255.0 + min;
    if floor {
        result.floor()
    } else {
        round2(result)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Round half up, as browsers do.
fn js_round(value: f64) -> f64 {
    let floor = value.floor();
    if value - floor >= 0.5 {
        value.ceil()
    } else {
        floor
    }
}

fn interpolate(from: f64, to: f64, f: f64) -> f64 {
    from * (1.0 - f) + to * f
}

fn rotation_matrix(degrees: f64) -> [f64; 4] {
    let rad = degrees.to_radians();
    [rad.cos(), -rad.sin(), rad.sin(), rad.cos()]
}

/// Hex rendering of a non-negative float, fraction digits included.
fn float_to_hex(mut x: f64) -> String {
    let mut digits: Vec<char> = Vec::new();
    let mut quotient = x.trunc();
    let mut fraction = x - quotient;

    while quotient > 0.0 {
        quotient = (x / 16.0).trunc();
        let remainder = (x - quotient * 16.0).trunc() as u32;
        digits.insert(0, hex_digit(remainder));
        x = quotient;
    }

    if fraction == 0.0 {
        return digits.into_iter().collect();
    }

    digits.push('.');
    while fraction > 0.0 {
        fraction *= 16.0;
        let integer = fraction.trunc();
        fraction -= integer;
        digits.push(hex_digit(integer as u32));
    }

    digits.into_iter().collect()
}

fn hex_digit(d: u32) -> char {
    if d > 9 {
        char::from(b'A' + (d - 10) as u8)
    } else {
        char::from(b'0' + d as u8)
    }
}

/// Cubic bezier easing through (0,0), (c0,c1), (c2,c3), (1,1).
struct Cubic<'a> {
    curves: &'a [f64],
}

impl<'a> Cubic<'a> {
    fn new(curves: &'a [f64]) -> Self {
        Self { curves }
    }

    fn value(&self, time: f64) -> f64 {
        let c = self.curves;

        if time <= 0.0 {
            let gradient = if c[0] > 0.0 {
                c[1] / c[0]
            } else if c[1] == 0.0 && c[2] > 0.0 {
                c[3] / c[2]
            } else {
                0.0
            };
            return gradient * time;
        }

        if time >= 1.0 {
            let gradient = if c[2] < 1.0 {
                (c[3] - 1.0) / (c[2] - 1.0)
            } else if c[2] == 1.0 && c[0] < 1.0 {
                (c[1] - 1.0) / (c[0] - 1.0)
            } else {
                0.0
            };
            return 1.0 + gradient * (time - 1.0);
        }

        let (mut start, mut end, mut mid) = (0.0_f64, 1.0_f64, 0.0_f64);
        while start < end {
            mid = (start + end) / 2.0;
            let estimate = Self::bezier(c[0], c[2], mid);
            if (time - estimate).abs() < 0.00001 {
                return Self::bezier(c[1], c[3], mid);
            }
            if estimate < time {
                start = mid;
            } else {
                end = mid;
            }
        }
        Self::bezier(c[1], c[3], mid)
    }

    fn bezier(a: f64, b: f64, m: f64) -> f64 {
        3.0 * a * (1.0 - m) * (1.0 - m) * m + 3.0 * b * (1.0 - m) * m * m + m * m * m
    }
}

/// Produces the signature header for a conversation request.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, method: Method, path: &str, ctx: &SigningContext) -> GrokResult<String>;
}

/// [`RequestSigner`] for the `x-statsig-id` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsigSigner {
    /// Fixed stamp; `None` draws a fresh one per call.
    stamp: Option<SignatureStamp>,
}

impl StatsigSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signer that always uses `stamp`.
    pub fn with_stamp(stamp: SignatureStamp) -> Self {
        Self { stamp: Some(stamp) }
    }
}

impl RequestSigner for StatsigSigner {
    fn sign(&self, method: Method, path: &str, ctx: &SigningContext) -> GrokResult<String> {
        let input = SignatureInput {
            path,
            method: method.as_str(),
            verification_token: &ctx.verification_token,
            svg_path: &ctx.svg_path,
            numbers: &ctx.numbers,
        };
        generate(&input, self.stamp.unwrap_or_else(SignatureStamp::now))
    }
}
