#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use staged_image::engine::planner::{crop_by_aspect, plan, resize_base, resize_target};
use staged_image::ops::{CropAlign, HorizontalAlign, ImageSize, ResizeRequest, VerticalAlign};

#[derive(Arbitrary, Debug)]
struct RequestSeed {
    kind: u8,
    a: u32,
    b: u32,
    percent: f64,
    aspect: f64,
    align: u8,
}

fn align_from(byte: u8) -> CropAlign {
    match byte % 7 {
        0 => CropAlign::None,
        1 => HorizontalAlign::Left.into(),
        2 => HorizontalAlign::Center.into(),
        3 => HorizontalAlign::Right.into(),
        4 => VerticalAlign::Top.into(),
        5 => VerticalAlign::Middle.into(),
        _ => VerticalAlign::Bottom.into(),
    }
}

fuzz_target!(|data: &[u8]| {
    let mut unstructured = Unstructured::new(data);
    let Ok((w, h)) = <(u16, u16)>::arbitrary(&mut unstructured) else {
        return;
    };
    let natural = ImageSize::new(u32::from(w).max(1), u32::from(h).max(1));
    let seeds: Vec<RequestSeed> = match Vec::arbitrary(&mut unstructured) {
        Ok(v) => v,
        Err(_) => return,
    };

    let mut crop = None;
    let mut request = None;
    for seed in seeds.into_iter().take(32) {
        match seed.kind % 5 {
            0 => {
                // rejected arguments leave the staged crop untouched
                if let Ok(region) = crop_by_aspect(natural, seed.aspect, align_from(seed.align)) {
                    crop = region;
                }
            }
            kind => {
                let candidate = match kind {
                    1 => ResizeRequest::Scale { percent: seed.percent },
                    2 => ResizeRequest::Exact { width: seed.a, height: seed.b },
                    3 => ResizeRequest::ByWidth { width: seed.a },
                    _ => ResizeRequest::ByHeight { height: seed.b },
                };
                // only requests that validate against the current base get staged
                if resize_target(resize_base(natural, crop.as_ref()), candidate).is_ok() {
                    request = Some(candidate);
                }
            }
        }

        let geometry = plan(natural, crop, request);
        if let Some(region) = geometry.crop {
            assert!(region.fits_within(natural.width, natural.height));
        }
        if let Some(target) = geometry.resize {
            assert!(target.width >= 1 && target.height >= 1);
        }
        let base = resize_base(natural, geometry.crop.as_ref());
        assert!(base.width >= 1 && base.height >= 1);
    }
});
