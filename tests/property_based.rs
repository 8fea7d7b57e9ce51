// tests/property_based.rs
//
// Property tests for transform planning.

use proptest::prelude::*;
use staged_image::engine::planner::{
    crop_by_aspect, plan, resize_base, resize_by_height, resize_by_width, resize_exact,
    scale_by_percent,
};
use staged_image::ops::{CropAlign, HorizontalAlign, ImageSize, ResizeRequest, VerticalAlign};

fn size_strategy() -> impl Strategy<Value = ImageSize> {
    (1u32..=4096, 1u32..=4096).prop_map(|(w, h)| ImageSize::new(w, h))
}

fn aspect_strategy() -> impl Strategy<Value = f64> {
    0.01f64..100.0
}

fn horizontal_strategy() -> impl Strategy<Value = HorizontalAlign> {
    prop_oneof![
        Just(HorizontalAlign::None),
        Just(HorizontalAlign::Left),
        Just(HorizontalAlign::Center),
        Just(HorizontalAlign::Right),
    ]
}

fn vertical_strategy() -> impl Strategy<Value = VerticalAlign> {
    prop_oneof![
        Just(VerticalAlign::None),
        Just(VerticalAlign::Top),
        Just(VerticalAlign::Middle),
        Just(VerticalAlign::Bottom),
    ]
}

fn request_strategy() -> impl Strategy<Value = ResizeRequest> {
    prop_oneof![
        (1.0f64..400.0).prop_map(|percent| ResizeRequest::Scale { percent }),
        (1u32..=2048, 1u32..=2048)
            .prop_map(|(width, height)| ResizeRequest::Exact { width, height }),
        (1u32..=2048).prop_map(|width| ResizeRequest::ByWidth { width }),
        (1u32..=2048).prop_map(|height| ResizeRequest::ByHeight { height }),
    ]
}

proptest! {
    #[test]
    fn equal_aspect_never_crops(size in size_strategy()) {
        prop_assert_eq!(crop_by_aspect(size, size.aspect, CropAlign::None).unwrap(), None);
    }

    #[test]
    fn crop_stays_inside_image(
        size in size_strategy(),
        aspect in aspect_strategy(),
        h in horizontal_strategy(),
        v in vertical_strategy(),
    ) {
        let align = if size.aspect > aspect { CropAlign::from(h) } else { CropAlign::from(v) };
        if let Some(region) = crop_by_aspect(size, aspect, align).unwrap() {
            prop_assert!(region.fits_within(size.width, size.height));
            prop_assert!(region.size.width >= 1 && region.size.height >= 1);
            // one axis is always kept whole
            prop_assert!(region.size.width == size.width || region.size.height == size.height);
            let expected = region.size.width as f64 / region.size.height as f64;
            prop_assert_eq!(region.size.aspect, expected);
        }
    }

    #[test]
    fn crop_offsets_follow_alignment(size in size_strategy(), aspect in aspect_strategy()) {
        prop_assume!(size.aspect > aspect);
        let at = |align: HorizontalAlign| crop_by_aspect(size, aspect, align.into()).unwrap();
        if let (Some(left), Some(center), Some(right)) =
            (at(HorizontalAlign::Left), at(HorizontalAlign::Center), at(HorizontalAlign::Right))
        {
            prop_assert_eq!(left.x, 0);
            prop_assert!(center.x <= right.x);
            prop_assert_eq!(right.x + right.size.width, size.width);
            prop_assert_eq!(left.y, 0);
        }
    }

    #[test]
    fn wrong_axis_is_always_rejected(size in size_strategy(), aspect in aspect_strategy()) {
        prop_assume!(size.aspect != aspect);
        let wrong = if size.aspect > aspect {
            CropAlign::from(VerticalAlign::Middle)
        } else {
            CropAlign::from(HorizontalAlign::Center)
        };
        prop_assert!(crop_by_aspect(size, aspect, wrong).is_err());
    }

    #[test]
    fn scale_is_floor_of_percentage(size in size_strategy(), percent in 1.0f64..400.0) {
        let target = scale_by_percent(size, percent).unwrap();
        let w = ((size.width as f64 * percent / 100.0).floor() as u32).max(1);
        let h = ((size.height as f64 * percent / 100.0).floor() as u32).max(1);
        prop_assert_eq!(target.dimensions(), (w, h));
    }

    #[test]
    fn resize_to_base_is_noop(size in size_strategy()) {
        prop_assert_eq!(resize_exact(size, size.width, size.height).unwrap(), None);
        prop_assert_eq!(resize_by_width(size, size.width).unwrap(), None);
        prop_assert_eq!(resize_by_height(size, size.height).unwrap(), None);
    }

    #[test]
    fn one_dimension_resize_keeps_aspect(size in size_strategy(), width in 1u32..=4096) {
        if let Some(target) = resize_by_width(size, width).unwrap() {
            prop_assert_eq!(target.width, width);
            let ideal = width as f64 / size.aspect;
            prop_assert!((target.height as f64 - ideal.max(1.0)).abs() <= 0.5 + 1e-9);
        }
    }

    #[test]
    fn plan_resizes_relative_to_crop(
        size in size_strategy(),
        aspect in aspect_strategy(),
        request in request_strategy(),
    ) {
        let crop = crop_by_aspect(size, aspect, CropAlign::None).unwrap();
        let geometry = plan(size, crop, Some(request));
        prop_assert_eq!(geometry.crop, crop);

        let base = resize_base(size, crop.as_ref());
        let direct = match request {
            ResizeRequest::Scale { percent } => Some(scale_by_percent(base, percent).unwrap()),
            ResizeRequest::Exact { width, height } => resize_exact(base, width, height).unwrap(),
            ResizeRequest::ByWidth { width } => resize_by_width(base, width).unwrap(),
            ResizeRequest::ByHeight { height } => resize_by_height(base, height).unwrap(),
        };
        prop_assert_eq!(geometry.resize, direct);
        if let Some(target) = geometry.resize {
            prop_assert!(target.width >= 1 && target.height >= 1);
        }
    }
}
