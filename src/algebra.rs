//! Elementwise scalar kernels shared by the acquisition and image containers.
//!
//! All container algebra reduces to one of these functions applied value by
//! value; keeping them in one place guarantees that a `multiply` on k-space
//! data means exactly the same thing as a `multiply` on images.

use num_complex::Complex32;

pub fn add(x: Complex32, y: Complex32) -> Complex32 {
    x + y
}

pub fn product(x: Complex32, y: Complex32) -> Complex32 {
    x * y
}

pub fn ratio(x: Complex32, y: Complex32) -> Complex32 {
    x / y
}

/// The operand with the larger real part wins.
pub fn maxreal(x: Complex32, y: Complex32) -> Complex32 {
    if x.re > y.re { x } else { y }
}

/// The operand with the smaller real part wins.
pub fn minreal(x: Complex32, y: Complex32) -> Complex32 {
    if x.re < y.re { x } else { y }
}

pub fn power(x: Complex32, y: Complex32) -> Complex32 {
    x.powc(y)
}

pub fn exp(x: Complex32) -> Complex32 {
    x.exp()
}

pub fn log(x: Complex32) -> Complex32 {
    x.ln()
}

pub fn sqrt(x: Complex32) -> Complex32 {
    x.sqrt()
}

/// Sign of the real part, as a complex value with zero imaginary part.
pub fn sign(x: Complex32) -> Complex32 {
    let s = if x.re > 0.0 {
        1.0
    } else if x.re < 0.0 {
        -1.0
    } else {
        0.0
    };
    Complex32::new(s, 0.0)
}

/// Magnitude, as a complex value with zero imaginary part.
pub fn abs(x: Complex32) -> Complex32 {
    Complex32::new(x.norm(), 0.0)
}
