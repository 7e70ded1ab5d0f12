//! Recognition prompts for Republic-era newspaper regions (traditional
//! Chinese, often vertical).

use crate::pipeline::region::RegionKind;

const BASE_PROMPT: &str = "请识别这个区域中的文字。

要求：
1. 这是民国报纸的一部分，使用繁体中文，可能是竖排
2. 精确识别所有文字，不要遗漏
3. 按正确的阅读顺序输出（竖排从上到下，如有多列从右到左）
4. 适当添加标点符号以辅助阅读
5. 直接输出识别的文字，不要添加任何说明";

const TITLE_SUFFIX: &str = "\n6. 这是标题区域，请用 Markdown 标题格式输出";
const TABLE_SUFFIX: &str = "\n6. 这是表格区域，请尽量保持表格结构";

pub fn build_prompt(kind: RegionKind) -> String {
    match kind {
        RegionKind::Title => format!("{BASE_PROMPT}{TITLE_SUFFIX}"),
        RegionKind::Table => format!("{BASE_PROMPT}{TABLE_SUFFIX}"),
        RegionKind::Text => BASE_PROMPT.to_string(),
    }
}
