#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

pub fn usize_from_f64(x: f64) -> usize {
    x.max(0.0) as usize
}

pub fn i32_from_f64(x: f64) -> i32 {
    x as i32
}

pub fn f64_from_usize(x: usize) -> f64 {
    x as f64
}

pub fn f64_from_u64(x: u64) -> f64 {
    x as f64
}
