use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) enum PixelFormat {
    Bgr24,
    Rgb24,
    Yuyv,
}

/// Convert a device buffer to BGR24.
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) fn normalize_to_bgr(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Bgr24 | PixelFormat::Rgb24 => {
            let expected = plane * 3;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "{:?} frame length mismatch: expected {}, got {}",
                    format,
                    expected,
                    pixels.len()
                ));
            }
            let pixels = &pixels[..expected];
            if format == PixelFormat::Bgr24 {
                Ok(pixels.to_vec())
            } else {
                Ok(pixels
                    .chunks_exact(3)
                    .flat_map(|rgb| [rgb[2], rgb[1], rgb[0]])
                    .collect())
            }
        }
        PixelFormat::Yuyv => yuyv_to_bgr(pixels, plane),
    }
}

fn yuyv_to_bgr(pixels: &[u8], plane: usize) -> Result<Vec<u8>> {
    let expected = plane * 2;
    if pixels.len() < expected || plane % 2 != 0 {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut bgr = Vec::with_capacity(plane * 3);
    for quad in pixels[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;
            bgr.push(clamp_to_u8(b));
            bgr.push(clamp_to_u8(g));
            bgr.push(clamp_to_u8(r));
        }
    }
    Ok(bgr)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
