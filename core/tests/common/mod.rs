/// Augmented subscript assignment `box[key] += 5` against user types whose
/// `__getitem__` / `__setitem__` record each call in the global `log`.
pub const BOX: &str = include_str!("box.sw");
