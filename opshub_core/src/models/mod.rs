pub mod auth;
pub mod device;
pub mod llm;

pub use auth::{Principal, Role, UserRecord};
pub use device::{
  ConnectionInfo, ConnectionProtocol, ConnectionTestResult, Device, DeviceCreateRequest,
  DeviceFilter, DeviceHealthSummary, DeviceListPage, DeviceMetrics, DeviceStatus, DeviceType,
  DeviceUpdateRequest, HeartbeatRequest, HeartbeatResponse, LiveDeviceStatus, ProbeErrorCode,
  StatusActor,
};
pub use llm::{
  ChatChoice, ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChatRole, DefaultFlags,
  LlmProvider, LlmRequestLog, ProviderConfig, ProviderCreateRequest, ProviderPurpose,
  ProviderType, ProviderUpdateRequest, RequestStatus, TokenUsage, WorkflowResult,
};
