use crossbeam_channel::bounded;
use negative_utils::debug_panic;
use snafu::{OptionExt, Snafu};
use wgpu::{
    BufferDescriptor, BufferUsages, COPY_BYTES_PER_ROW_ALIGNMENT, Device, Extent3d, MapMode,
    Origin3d, PollType, Queue, TexelCopyBufferInfo, TexelCopyBufferLayout, TexelCopyTextureInfo,
    Texture, TextureAspect, TextureFormat,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum ReadbackError {
    #[snafu(display("Unsupported texture format {:?} for readback", format))]
    UnsupportedFormat { format: TextureFormat },

    #[snafu(display("Cannot read back empty texture: {width}x{height}"))]
    InvalidDimensions { width: u32, height: u32 },

    #[snafu(display("Failed to map readback buffer: {source:?}"))]
    Map { source: wgpu::BufferAsyncError },

    #[snafu(display("Failed to map readback buffer: channel closed"))]
    MapChannelClosed,

    #[snafu(display("Unknown external texture"))]
    Unknown,
}

fn is_supported(format: TextureFormat) -> bool {
    matches!(
        format,
        TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rgba32Float
    )
}

fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Reads a texture into an RGBA8 buffer (no gamma conversion) and strips row padding.
pub fn read_texture_as_rgba(
    device: &Device,
    queue: &Queue,
    texture: &Texture,
) -> Result<Vec<u8>, ReadbackError> {
    let height = texture.height();
    let width = texture.width();
    let format = texture.format();

    if width == 0 || height == 0 {
        return Err(ReadbackError::InvalidDimensions { width, height });
    }

    if !is_supported(format) {
        return Err(ReadbackError::UnsupportedFormat { format });
    }

    let bytes_per_pixel: u32 = format
        .block_copy_size(None)
        .with_context(|| UnsupportedFormatSnafu { format })?;

    let bytes_per_row = bytes_per_pixel * width;
    let padded_bytes_per_row =
        bytes_per_row.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = device.create_buffer(&BufferDescriptor {
        label: Some("Readback Buffer"),
        size: padded_bytes_per_row as u64 * height as u64,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });

    encoder.copy_texture_to_buffer(
        TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        TexelCopyBufferInfo {
            buffer: &buffer,
            layout: TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );

    queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = bounded(1);
    slice.map_async(MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    let _ = device.poll(PollType::wait_indefinitely());

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(source)) => return Err(ReadbackError::Map { source }),
        Err(_) => return Err(ReadbackError::MapChannelClosed),
    }

    let data = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);

    for row in 0..height as usize {
        let start = row * padded_bytes_per_row as usize;
        let row_data = &data[start..start + bytes_per_row as usize];

        if format == TextureFormat::Rgba32Float {
            let (chunks, leftover) = row_data.as_chunks::<4>();
            debug_assert!(leftover.is_empty());

            pixels.extend(chunks.iter().map(|c| quantize(f32::from_le_bytes(*c))));
        } else if bytes_per_pixel == 4 {
            pixels.extend_from_slice(row_data);
        } else {
            debug_panic!("Set format {format:?} as supported, but not actually supported.");
            return Err(ReadbackError::UnsupportedFormat { format });
        }
    }

    drop(data);
    buffer.unmap();

    if matches!(
        format,
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb
    ) {
        for chunk in pixels.chunks_exact_mut(4) {
            chunk.swap(0, 2);
        }
    }

    Ok(pixels)
}
