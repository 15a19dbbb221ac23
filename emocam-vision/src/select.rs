use crate::detect::FaceRect;

/// Pick the rectangle with the largest area. Ties go to the earliest one, so
/// the choice only depends on detector output order.
pub fn select_largest(faces: &[FaceRect]) -> Option<FaceRect> {
    let mut best: Option<FaceRect> = None;
    for face in faces {
        match best {
            Some(b) if face.area() <= b.area() => {}
            _ => best = Some(*face),
        }
    }
    best
}
