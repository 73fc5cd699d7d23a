use crate::config::{ResizeMode, UpscalerChain};
use crate::error::Error;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

/// Second-stage blending: the upscaler's own result is mixed over `base`.
#[derive(Clone, Copy)]
pub struct Blend<'a> {
    pub base: &'a DynamicImage,
    pub visibility: f32,
}

/// Parameters for one stage of the upscaler chain.
#[derive(Clone, Copy)]
pub struct StageRequest<'a> {
    pub upscaler: &'a str,
    pub resize: ResizeMode,
    pub crop: bool,
    pub blend: Option<Blend<'a>>,
}

impl StageRequest<'_> {
    /// Brings a raw model output to the requested geometry and applies the
    /// blend, if any.
    pub fn finish(&self, source: &DynamicImage, upscaled: DynamicImage, filter: FilterType) -> DynamicImage {
        let (width, height) = self.resize.scaled_dimensions(source.width(), source.height());
        let mut image = if upscaled.width() == width && upscaled.height() == height {
            upscaled
        } else {
            upscaled.resize_exact(width, height, filter)
        };

        if let Some((crop_width, crop_height)) = self.resize.crop_dimensions(self.crop) {
            let crop_width = crop_width.min(image.width());
            let crop_height = crop_height.min(image.height());
            let x = (image.width() - crop_width) / 2;
            let y = (image.height() - crop_height) / 2;
            image = image.crop_imm(x, y, crop_width, crop_height);
        }

        match self.blend {
            Some(blend) => blend_over(blend.base, &image, blend.visibility),
            None => image,
        }
    }
}

/// `base * (1 - visibility) + top * visibility`, resizing `top` to `base` if needed.
pub fn blend_over(base: &DynamicImage, top: &DynamicImage, visibility: f32) -> DynamicImage {
    let visibility = visibility.clamp(0.0, 1.0);
    let base = base.to_rgb8();
    let top = if top.width() == base.width() && top.height() == base.height() {
        top.to_rgb8()
    } else {
        top.resize_exact(base.width(), base.height(), FilterType::Lanczos3).to_rgb8()
    };

    let blended = RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let a = base.get_pixel(x, y);
        let b = top.get_pixel(x, y);
        image::Rgb([0usize, 1, 2].map(|c| {
            (a[c] as f32 * (1.0 - visibility) + b[c] as f32 * visibility).round() as u8
        }))
    });
    DynamicImage::ImageRgb8(blended)
}

#[cfg_attr(test, mockall::automock)]
pub trait Upscaler: Sync + Send {
    fn upscale<'a>(&self, image: &DynamicImage, request: &StageRequest<'a>) -> Result<DynamicImage, Error>;
}

/// Plain resampling, no model involved.
#[derive(Clone, Copy, Debug)]
pub struct ResampleUpscaler {
    filter: FilterType,
}

impl ResampleUpscaler {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Upscaler for ResampleUpscaler {
    fn upscale(&self, image: &DynamicImage, request: &StageRequest<'_>) -> Result<DynamicImage, Error> {
        Ok(request.finish(image, image.clone(), self.filter))
    }
}

#[cfg(feature = "realcugan")]
mod realcugan {
    use super::*;
    use realcugan_rs::RealCugan;

    pub struct RealCuganUpscaler {
        model: RealCugan,
    }

    impl RealCuganUpscaler {
        pub fn new(scale: u8) -> Self {
            let model = match scale {
                3 => realcugan_rs::Model::Se3xConservative,
                4 => realcugan_rs::Model::Se4xConservative,
                _ => realcugan_rs::Model::Se2xConservative,
            };
            Self {
                model: RealCugan::from_model(model),
            }
        }
    }

    impl Upscaler for RealCuganUpscaler {
        fn upscale(&self, image: &DynamicImage, request: &StageRequest<'_>) -> Result<DynamicImage, Error> {
            let upscaled = self
                .model
                .process_image(image.clone())
                .map_err(|e| Error::upscale(e.to_string()))?;
            Ok(request.finish(image, upscaled, FilterType::Lanczos3))
        }
    }
}

#[cfg(feature = "realesrgan")]
mod realesrgan {
    use super::*;
    use realesrgan_rs::{Options as RealEsrganOptions, OptionsModel as RealEsrganOptionsModel, RealEsrgan};

    pub struct RealEsrganUpscaler {
        model: RealEsrgan,
    }

    impl RealEsrganUpscaler {
        pub fn new(anime: bool) -> Result<Self, Error> {
            let model = if anime {
                RealEsrganOptionsModel::RealESRGANPlusx4Anime
            } else {
                RealEsrganOptionsModel::RealESRGANPlusx4
            };
            let options = RealEsrganOptions::default().model(model);
            let model = RealEsrgan::new(options).map_err(|e| Error::upscale(e.to_string()))?;
            Ok(Self { model })
        }
    }

    impl Upscaler for RealEsrganUpscaler {
        fn upscale(&self, image: &DynamicImage, request: &StageRequest<'_>) -> Result<DynamicImage, Error> {
            let rgb = image.to_rgb8();
            let (width, height) = (rgb.width() as usize, rgb.height() as usize);
            let bytes = self
                .model
                .process(rgb.as_raw(), width, height)
                .map_err(Error::upscale)?;
            let scale = (bytes.len() / (width * height * 3)).max(1);
            let scale = (scale as f64).sqrt().round() as u32;
            let buffer = RgbImage::from_raw(rgb.width() * scale, rgb.height() * scale, bytes)
                .ok_or_else(|| Error::upscale("model returned a malformed buffer"))?;
            Ok(request.finish(image, DynamicImage::ImageRgb8(buffer), FilterType::Lanczos3))
        }
    }
}

/// Upscalers available to a job, looked up by name once at job start.
#[derive(Clone, Default)]
pub struct UpscalerRegistry {
    upscalers: HashMap<String, Arc<dyn Upscaler>>,
}

impl UpscalerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the resampling upscalers and any compiled-in models.
    pub fn with_builtin() -> Result<Self, Error> {
        #[allow(unused_mut)]
        let mut registry = Self::new()
            .register("Lanczos", Arc::new(ResampleUpscaler::new(FilterType::Lanczos3)))
            .register("Nearest", Arc::new(ResampleUpscaler::new(FilterType::Nearest)));

        #[cfg(feature = "realcugan")]
        {
            for scale in [2u8, 3, 4] {
                registry = registry.register(
                    format!("RealCUGAN {}x", scale),
                    Arc::new(realcugan::RealCuganUpscaler::new(scale)),
                );
            }
        }

        #[cfg(feature = "realesrgan")]
        {
            registry = registry
                .register("R-ESRGAN 4x+", Arc::new(realesrgan::RealEsrganUpscaler::new(false)?))
                .register("R-ESRGAN 4x+ Anime6B", Arc::new(realesrgan::RealEsrganUpscaler::new(true)?));
        }

        Ok(registry)
    }

    pub fn register(mut self, name: impl Into<String>, upscaler: Arc<dyn Upscaler>) -> Self {
        self.upscalers.insert(name.into(), upscaler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Upscaler>> {
        self.upscalers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.upscalers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves every stage that will run. A disabled second stage is not
    /// looked up, so it may name an upscaler that is not registered.
    pub fn resolve(&self, chain: &UpscalerChain) -> Result<ResolvedChain, Error> {
        let lookup = |name: &str| self.get(name).ok_or_else(|| Error::UnknownUpscaler(name.to_string()));
        let primary = lookup(&chain.primary.name)?;
        let secondary = chain
            .active_secondary()
            .map(|spec| lookup(&spec.name).map(|upscaler| (spec.name.clone(), spec.visibility, upscaler)))
            .transpose()?;
        Ok(ResolvedChain {
            primary_name: chain.primary.name.clone(),
            primary,
            secondary,
        })
    }
}

impl fmt::Debug for UpscalerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpscalerRegistry").field("upscalers", &self.names()).finish()
    }
}

/// A chain whose stages have been looked up.
#[derive(Clone)]
pub struct ResolvedChain {
    primary_name: String,
    primary: Arc<dyn Upscaler>,
    secondary: Option<(String, f32, Arc<dyn Upscaler>)>,
}

impl ResolvedChain {
    pub fn stage_count(&self) -> usize {
        1 + usize::from(self.secondary.is_some())
    }

    /// Runs the chain on one frame.
    pub fn apply(&self, image: &DynamicImage, resize: ResizeMode, crop: bool) -> Result<DynamicImage, Error> {
        let first = self.primary.upscale(
            image,
            &StageRequest {
                upscaler: &self.primary_name,
                resize,
                crop,
                blend: None,
            },
        )?;

        match &self.secondary {
            Some((name, visibility, upscaler)) => upscaler.upscale(
                image,
                &StageRequest {
                    upscaler: name,
                    resize,
                    crop,
                    blend: Some(Blend {
                        base: &first,
                        visibility: *visibility,
                    }),
                },
            ),
            None => Ok(first),
        }
    }
}
