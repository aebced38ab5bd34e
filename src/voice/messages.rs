//! Guide prompts, in Moroccan Darija

/// Introduces the letter by name
pub fn introduce(name: &str) -> String {
    format!("هاد هو الحرف {}. اسمع مزيان", name)
}

pub const PRESS_LISTEN: &str = "دَبَ اضغط على الزر باش تسمع الحرف";
pub const SAY_LETTER: &str = "دابَ قل نفس الحرف. اضغط على الميكروفون وقل الحرف";
pub const PRONUNCIATION_CORRECT: &str = "برافو! نطقك صحيح";
pub const TRY_AGAIN: &str = "حاول مرة أخرى";
pub const FIND_LETTER: &str = "دَبَا شوف الحرف وعرفو من بين الحروف الأخرى";
pub const RECOGNIZED: &str = "ممتاز! عرفت الحرف";
pub const WRONG_CHOICE: &str = "لا، هذا مَشِي الحرف الصحيح. حاول مرة أخرى";
pub const WRITE_LETTER: &str = "دَبَ كتب الحرف في المربع الأبيض";
pub const WRITTEN_WELL: &str = "أحسنت! كتبت الحرف بشكل جيد";
pub const WRITTEN_WRONG: &str = "حاول مرة أخرى. الحرف ليس صحيحاً";
pub const LETTER_COMPLETE: &str = "مبروك! أتممت تعلم هذا الحرف. اضغط على التالي للحرف القادم";
