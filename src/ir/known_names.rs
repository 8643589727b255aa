// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Well known framework annotations, types and method signatures that are treated in special ways.

use lazy_static::lazy_static;
use std::collections::HashMap;

use super::program::Annotation;

/// Well known annotation types.
#[derive(Clone, Copy, Debug, Eq, PartialOrd, PartialEq, Hash, Ord)]
pub enum KnownNames {
    /// This is not a known name
    None,

    // Spring stereotypes that declare a bean.
    SpringService,
    SpringComponent,
    SpringRepository,
    SpringController,
    SpringRestController,
    IbatisMapper,
    FeignClient,
    HsfProvider,
    ConfigurationProperties,
    ConditionalOnClass,
    ConditionalOnProperty,

    // Container configuration and injection.
    Configuration,
    Bean,
    Primary,
    Autowired,
    Qualifier,
    Resource,
    Inject,

    // Web mappings, matched by suffix.
    RequestMapping,
    GetMapping,
    PostMapping,
    PutMapping,
    DeleteMapping,
    PatchMapping,
    RsPath,
    RsGet,
    RsPost,
    RsPut,
    RsDelete,

    // Remote providers and message consumers.
    DubboService,
    AlibabaDubboService,
    ApacheDubboService,
    KafkaListener,
    RabbitListener,
    MybatisParam,
}

pub const KAFKA_SEND: &str = "<org.springframework.kafka.core.KafkaTemplate: \
     org.springframework.util.concurrent.ListenableFuture send(java.lang.String,java.lang.Object)>";

pub const RABBIT_CONVERT_AND_SEND: &str = "<org.springframework.amqp.rabbit.core.RabbitTemplate: \
     void convertAndSend(java.lang.String,java.lang.String,java.lang.Object,\
     org.springframework.amqp.rabbit.support.CorrelationData)>";

pub const RABBIT_BINDING_INIT: &str = "<org.springframework.amqp.core.Binding: \
     void <init>(java.lang.String,org.springframework.amqp.core.Binding$DestinationType,\
     java.lang.String,java.lang.String,java.util.Map)>";

pub const STRING_FORMAT: &str =
    "<java.lang.String: java.lang.String format(java.lang.String,java.lang.Object[])>";

pub const REST_TEMPLATE_EXCHANGE: [&str; 4] = [
    "<org.springframework.web.client.RestTemplate: org.springframework.http.ResponseEntity \
     exchange(java.lang.String,org.springframework.http.HttpMethod,org.springframework.http.HttpEntity,\
     org.springframework.core.ParameterizedTypeReference,java.lang.Object[])>",
    "<org.springframework.web.client.RestTemplate: org.springframework.http.ResponseEntity \
     exchange(java.lang.String,org.springframework.http.HttpMethod,org.springframework.http.HttpEntity,\
     org.springframework.core.ParameterizedTypeReference,java.util.Map)>",
    "<org.springframework.web.client.RestTemplate: org.springframework.http.ResponseEntity \
     exchange(java.lang.String,org.springframework.http.HttpMethod,org.springframework.http.HttpEntity,\
     java.lang.Class,java.lang.Object[])>",
    "<org.springframework.web.client.RestTemplate: org.springframework.http.ResponseEntity \
     exchange(java.lang.String,org.springframework.http.HttpMethod,org.springframework.http.HttpEntity,\
     java.lang.Class,java.util.Map)>",
];

pub const GRPC_BINDABLE_SERVICE: &str = "io.grpc.BindableService";
pub const GRPC_ABSTRACT_STUB: &str = "io.grpc.stub.AbstractStub";

/// Parameter types that never carry attacker-controlled data into a controller.
pub const SAFE_PARAM_TYPES: [&str; 23] = [
    "boolean",
    "byte",
    "char",
    "short",
    "int",
    "long",
    "float",
    "double",
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
    "jakarta.servlet.http.HttpSession",
    "javax.servlet.http.HttpServletResponse",
    "jakarta.servlet.http.HttpServletResponse",
    "javax.servlet.ServletResponse",
    "org.springframework.ui.Model",
    "org.springframework.ui.ModelMap",
    "org.springframework.validation.BindingResult",
    "org.springframework.web.servlet.ModelAndView",
];

lazy_static! {
    static ref EXACT_NAMES: HashMap<&'static str, KnownNames> = {
        let mut map = HashMap::new();
        map.insert("org.springframework.stereotype.Service", KnownNames::SpringService);
        map.insert("org.springframework.stereotype.Component", KnownNames::SpringComponent);
        map.insert("org.springframework.stereotype.Repository", KnownNames::SpringRepository);
        map.insert("org.springframework.stereotype.Controller", KnownNames::SpringController);
        map.insert("org.springframework.web.bind.annotation.RestController", KnownNames::SpringRestController);
        map.insert("org.apache.ibatis.annotations.Mapper", KnownNames::IbatisMapper);
        map.insert("com.alibaba.boot.hsf.annotation.HSFProvider", KnownNames::HsfProvider);
        map.insert(
            "org.springframework.boot.context.properties.ConfigurationProperties",
            KnownNames::ConfigurationProperties,
        );
        map.insert(
            "org.springframework.boot.autoconfigure.condition.ConditionalOnClass",
            KnownNames::ConditionalOnClass,
        );
        map.insert(
            "org.springframework.boot.autoconfigure.condition.ConditionalOnProperty",
            KnownNames::ConditionalOnProperty,
        );
        map.insert("org.springframework.context.annotation.Configuration", KnownNames::Configuration);
        map.insert("org.springframework.context.annotation.Bean", KnownNames::Bean);
        map.insert("org.springframework.context.annotation.Primary", KnownNames::Primary);
        map.insert("org.springframework.beans.factory.annotation.Autowired", KnownNames::Autowired);
        map.insert("org.springframework.beans.factory.annotation.Qualifier", KnownNames::Qualifier);
        map.insert("javax.annotation.Resource", KnownNames::Resource);
        map.insert("jakarta.annotation.Resource", KnownNames::Resource);
        map.insert("javax.inject.Inject", KnownNames::Inject);
        map.insert("jakarta.inject.Inject", KnownNames::Inject);
        map.insert("org.apache.dubbo.config.annotation.DubboService", KnownNames::DubboService);
        map.insert("com.alibaba.dubbo.config.annotation.Service", KnownNames::AlibabaDubboService);
        map.insert("org.apache.dubbo.config.annotation.Service", KnownNames::ApacheDubboService);
        map.insert("org.springframework.kafka.annotation.KafkaListener", KnownNames::KafkaListener);
        map.insert("org.springframework.amqp.rabbit.annotation.RabbitListener", KnownNames::RabbitListener);
        map.insert("org.apache.ibatis.annotations.Param", KnownNames::MybatisParam);
        map
    };

    static ref SUFFIX_NAMES: Vec<(&'static str, KnownNames)> = vec![
        (".web.bind.annotation.RequestMapping", KnownNames::RequestMapping),
        (".web.bind.annotation.GetMapping", KnownNames::GetMapping),
        (".web.bind.annotation.PostMapping", KnownNames::PostMapping),
        (".web.bind.annotation.PutMapping", KnownNames::PutMapping),
        (".web.bind.annotation.DeleteMapping", KnownNames::DeleteMapping),
        (".web.bind.annotation.PatchMapping", KnownNames::PatchMapping),
        (".ws.rs.Path", KnownNames::RsPath),
        (".ws.rs.GET", KnownNames::RsGet),
        (".ws.rs.POST", KnownNames::RsPost),
        (".ws.rs.PUT", KnownNames::RsPut),
        (".ws.rs.DELETE", KnownNames::RsDelete),
        (".FeignClient", KnownNames::FeignClient),
        (".DubboService", KnownNames::DubboService),
    ];
}

impl KnownNames {
    /// Classifies an annotation type name.
    pub fn of(type_name: &str) -> KnownNames {
        if let Some(known) = EXACT_NAMES.get(type_name) {
            return *known;
        }
        SUFFIX_NAMES
            .iter()
            .find(|(suffix, _)| type_name.ends_with(suffix))
            .map(|(_, known)| *known)
            .unwrap_or(KnownNames::None)
    }

    pub fn of_annotation(annotation: &Annotation) -> KnownNames {
        Self::of(&annotation.type_name)
    }

    /// Annotations that register a Spring bean for the annotated class.
    pub fn is_bean_stereotype(self) -> bool {
        matches!(
            self,
            KnownNames::SpringService
                | KnownNames::SpringComponent
                | KnownNames::SpringRepository
                | KnownNames::SpringController
                | KnownNames::SpringRestController
                | KnownNames::IbatisMapper
                | KnownNames::FeignClient
                | KnownNames::HsfProvider
                | KnownNames::ConfigurationProperties
                | KnownNames::ConditionalOnClass
                | KnownNames::ConditionalOnProperty
        )
    }

    /// Stereotypes whose `value` element is not a bean name.
    pub fn is_unnamed_stereotype(self) -> bool {
        matches!(
            self,
            KnownNames::ConfigurationProperties
                | KnownNames::ConditionalOnClass
                | KnownNames::ConditionalOnProperty
        )
    }

    pub fn is_controller(self) -> bool {
        matches!(self, KnownNames::SpringController | KnownNames::SpringRestController)
    }

    pub fn is_spring_mapping(self) -> bool {
        matches!(
            self,
            KnownNames::RequestMapping
                | KnownNames::GetMapping
                | KnownNames::PostMapping
                | KnownNames::PutMapping
                | KnownNames::DeleteMapping
                | KnownNames::PatchMapping
        )
    }

    pub fn is_jax_rs(self) -> bool {
        matches!(
            self,
            KnownNames::RsPath | KnownNames::RsGet | KnownNames::RsPost | KnownNames::RsPut | KnownNames::RsDelete
        )
    }

    /// Spring mappings and JAX-RS path/method annotations.
    pub fn is_mapping(self) -> bool {
        self.is_spring_mapping() || self.is_jax_rs()
    }

    pub fn is_injection(self) -> bool {
        matches!(self, KnownNames::Autowired | KnownNames::Resource | KnownNames::Inject)
    }

    pub fn is_dubbo_provider(self) -> bool {
        matches!(
            self,
            KnownNames::DubboService | KnownNames::AlibabaDubboService | KnownNames::ApacheDubboService
        )
    }
}

/// Returns true if any annotation classifies as `known`.
pub fn has_known(annotations: &[Annotation], known: KnownNames) -> bool {
    annotations.iter().any(|a| KnownNames::of_annotation(a) == known)
}

/// Returns the first annotation that satisfies `pred` after classification.
pub fn find_known<'a>(
    annotations: &'a [Annotation],
    pred: impl Fn(KnownNames) -> bool,
) -> Option<&'a Annotation> {
    annotations.iter().find(|a| pred(KnownNames::of_annotation(a)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_annotation_names() {
        assert_eq!(
            KnownNames::of("org.springframework.web.bind.annotation.GetMapping"),
            KnownNames::GetMapping
        );
        assert_eq!(KnownNames::of("jakarta.ws.rs.Path"), KnownNames::RsPath);
        assert_eq!(
            KnownNames::of("org.springframework.cloud.openfeign.FeignClient"),
            KnownNames::FeignClient
        );
        assert_eq!(KnownNames::of("jakarta.annotation.Resource"), KnownNames::Resource);
        assert_eq!(KnownNames::of("com.foo.Unknown"), KnownNames::None);
        assert!(KnownNames::of("org.springframework.stereotype.Service").is_bean_stereotype());
        assert!(KnownNames::ConditionalOnClass.is_unnamed_stereotype());
        assert!(!KnownNames::SpringService.is_unnamed_stereotype());
    }
}
