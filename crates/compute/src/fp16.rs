//! IEEE 754 binary16 conversion for half-precision blobs.

/// Converts to half precision bits, rounding to nearest even.
#[must_use]
pub fn f32_to_f16(value: f32) -> u16 {
    let x = value.to_bits();
    let sign = ((x >> 16) & 0x8000) as u16;
    let exp = ((x >> 23) & 0xff) as i32;
    let man = x & 0x007f_ffff;

    if exp == 0xff {
        let nan = if man == 0 { 0 } else { 0x0200 };
        return sign | 0x7c00 | nan;
    }

    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let full = man | 0x0080_0000;
        let shift = (14 - e) as u32;
        let round_bit = 1u32 << (shift - 1);
        let mut half = full >> shift;
        if full & round_bit != 0 && full & (3 * round_bit - 1) != 0 {
            half += 1;
        }
        return sign | half as u16;
    }

    let mut half = (u32::from(sign)) | ((e as u32) << 10) | (man >> 13);
    let round_bit = 0x0000_1000;
    if man & round_bit != 0 && man & (3 * round_bit - 1) != 0 {
        half += 1;
    }
    half as u16
}

#[must_use]
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits & 0x8000) << 16;
    let exp = u32::from((bits >> 10) & 0x1f);
    let man = u32::from(bits & 0x03ff);
    match (exp, man) {
        (0, 0) => f32::from_bits(sign),
        (0, _) => {
            let magnitude = man as f32 * 2f32.powi(-24);
            if sign == 0 { magnitude } else { -magnitude }
        }
        (0x1f, 0) => f32::from_bits(sign | 0x7f80_0000),
        (0x1f, _) => f32::from_bits(sign | 0x7fc0_0000 | (man << 13)),
        _ => f32::from_bits(sign | ((exp + 112) << 23) | (man << 13)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_values_survive() {
        for v in [0.0f32, 1.0, -2.5, 0.5, 65504.0, 2f32.powi(-24)] {
            assert_eq!(f16_to_f32(f32_to_f16(v)), v, "{v}");
        }
    }

    #[test]
    fn overflow_and_nan() {
        assert_eq!(f32_to_f16(1.0e6), 0x7c00);
        assert!(f16_to_f32(f32_to_f16(f32::NAN)).is_nan());
        assert_eq!(f32_to_f16(1.0e-9), 0);
    }
}
