//! # 常用接口模块
//!
//! 目前只提供单元测试用的错误断言宏。
