/// 健康检查
pub mod health;
/// OG 预览图渲染
pub mod og;
